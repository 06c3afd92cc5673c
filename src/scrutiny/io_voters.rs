// Reading voter lists from Excel and CSV files.

use std::path::Path;

use calamine::{open_workbook, DataType, Reader, Xlsx};

use delegate_tally::{fresh_id, Person};

use crate::scrutiny::*;

/// name, lastName1, lastName2, location
const VOTER_COLUMNS: usize = 4;

/// Reads a voter list. The format is chosen from the file extension.
pub fn read_voters(path: &str, worksheet: Option<&str>) -> TallyCliResult<Vec<Person>> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    info!("read_voters: path: {:?} extension: {:?}", path, extension);
    let rows = match extension.as_deref() {
        Some("xlsx") => read_excel_rows(path, worksheet)?,
        Some("csv") => read_csv_rows(path)?,
        x => whatever!("Unsupported voter file type {:?}, expected xlsx or csv", x),
    };
    let found = rows.first().map(|header| header_width(header)).unwrap_or(0);
    if found < VOTER_COLUMNS {
        return MissingColumnsSnafu {
            path: path.to_string(),
            found,
        }
        .fail();
    }
    let voters: Vec<Person> = rows
        .iter()
        // The first row is the header.
        .skip(1)
        .filter_map(|row| voter_from_row(row))
        .collect();
    info!(
        "read_voters: {} voters out of {} rows",
        voters.len(),
        rows.len().saturating_sub(1)
    );
    Ok(voters)
}

fn header_width(header: &[String]) -> usize {
    header
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map_or(0, |idx| idx + 1)
}

/// Builds a voter from the cells [name, lastName1, lastName2, location].
///
/// Rows with neither a name nor a first surname are not voters.
pub fn voter_from_row(row: &[String]) -> Option<Person> {
    let cell = |idx: usize| row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();
    let person = Person {
        id: fresh_id("voter"),
        name: cell(0),
        last_name1: cell(1),
        last_name2: cell(2),
        location: cell(3),
    };
    if person.name.is_empty() && person.last_name1.is_empty() {
        debug!("voter_from_row: skipping row {:?}", row);
        return None;
    }
    Some(person)
}

fn read_csv_rows(path: &str) -> TallyCliResult<Vec<Vec<String>>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu {
            path: path.to_string(),
        })?;
    let mut res: Vec<Vec<String>> = Vec::new();
    for (idx, line_r) in rdr.into_records().enumerate() {
        let line = line_r.context(CsvLineParseSnafu { lineno: idx + 1 })?;
        res.push(line.iter().map(|s| s.to_string()).collect());
    }
    Ok(res)
}

fn read_excel_rows(path: &str, worksheet: Option<&str>) -> TallyCliResult<Vec<Vec<String>>> {
    let wrange = get_range(path, worksheet)?;
    let mut res: Vec<Vec<String>> = Vec::new();
    for row in wrange.rows() {
        let mut cells: Vec<String> = Vec::new();
        for elt in row {
            cells.push(read_cell(elt)?);
        }
        res.push(cells);
    }
    Ok(res)
}

fn read_cell(cell: &DataType) -> TallyCliResult<String> {
    match cell {
        DataType::String(s) => Ok(s.clone()),
        DataType::Empty => Ok("".to_string()),
        // Numbers show up in the location column (postal codes, districts).
        DataType::Int(i) => Ok(i.to_string()),
        DataType::Float(f) if f.fract() == 0.0 => Ok(format!("{}", *f as i64)),
        DataType::Float(f) => Ok(f.to_string()),
        DataType::Bool(b) => Ok(b.to_string()),
        x => whatever!("Unexpected cell content in the voter list: {:?}", x),
    }
}

fn get_range(path: &str, worksheet: Option<&str>) -> TallyCliResult<calamine::Range<DataType>> {
    debug!("get_range: path: {:?} worksheet: {:?}", path, worksheet);
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu {
        path: path.to_string(),
    })?;

    // A worksheet name was provided, use it.
    if let Some(worksheet_name) = worksheet {
        let wrange = workbook
            .worksheet_range(worksheet_name)
            .context(EmptyExcelSnafu {
                path: path.to_string(),
            })?
            .context(OpeningExcelSnafu {
                path: path.to_string(),
            })?;
        return Ok(wrange);
    }
    debug!("get_range: using the first worksheet");
    workbook
        .worksheet_range_at(0)
        .context(EmptyExcelSnafu {
            path: path.to_string(),
        })?
        .context(OpeningExcelSnafu {
            path: path.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rows_become_voters() {
        let p = voter_from_row(&row(&[" María ", "Torres", "Gil", "Bilbao"])).unwrap();
        assert_eq!(p.full_name(), "María Torres Gil");
        assert_eq!(p.location, "Bilbao");
        assert!(!p.id.is_empty());

        let short = voter_from_row(&row(&["", "Ruiz"])).unwrap();
        assert_eq!(short.full_name(), "Ruiz");
        assert_eq!(short.location, "");

        assert_eq!(voter_from_row(&row(&["", " ", "Gil", "Bilbao"])), None);
        assert_eq!(voter_from_row(&[]), None);
    }

    #[test]
    fn reads_csv_voters() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("voters.csv");
        fs::write(
            &p,
            "Nombre,Primer apellido,Segundo apellido,Localidad\n\
             Ana,Garcia,Lopez,Madrid\n\
             ,,,\n\
             Luis,Martin\n",
        )
        .unwrap();
        let voters = read_voters(p.to_str().unwrap(), None).unwrap();
        let names: Vec<String> = voters.iter().map(|v| v.full_name()).collect();
        assert_eq!(names, vec!["Ana Garcia Lopez", "Luis Martin"]);
        assert_ne!(voters[0].id, voters[1].id);
    }

    fn fixture(name: &str) -> String {
        format!("{}/tests/data/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn reads_the_first_worksheet() {
        let voters = read_voters(&fixture("members.xlsx"), None).unwrap();
        let names: Vec<String> = voters.iter().map(|v| v.full_name()).collect();
        assert_eq!(names, vec!["Ana Garcia Lopez", "Luis Martin", "Marta Ruiz"]);
        assert_eq!(voters[1].location, "28001");
    }

    #[test]
    fn reads_a_named_worksheet() {
        let voters = read_voters(&fixture("members.xlsx"), Some("Invitados")).unwrap();
        let names: Vec<String> = voters.iter().map(|v| v.full_name()).collect();
        assert_eq!(names, vec!["Pedro Sanz"]);
        assert!(read_voters(&fixture("members.xlsx"), Some("Socios")).is_err());
    }

    #[test]
    fn needs_four_header_columns() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("voters.csv");
        fs::write(&p, "Nombre,Primer apellido,Localidad\nAna,Garcia,Madrid\n").unwrap();
        assert!(matches!(
            read_voters(p.to_str().unwrap(), None),
            Err(TallyCliError::MissingColumns { found: 3, .. })
        ));
        fs::write(&p, "").unwrap();
        assert!(read_voters(p.to_str().unwrap(), None).is_err());
    }

    #[test]
    fn rejects_unknown_formats() {
        assert!(read_voters("voters.ods", None).is_err());
        assert!(read_voters("missing.xlsx", None).is_err());
    }
}
