use log::{debug, info, warn};

use delegate_tally::ballots::BallotBook;
use delegate_tally::builder::BallotDraft;
use delegate_tally::impact::{ImpactReevaluator, ImpactVerdict};
use delegate_tally::store::{
    read_value, write_value, BallotSource, ConfigurationSource, KeyValueStore, Notifier,
    StorageKey, TiebreakerStore, VoterDirectory,
};
use delegate_tally::tiebreaker::{build_main_results, Phase, TiebreakerSession};
use delegate_tally::*;
use snafu::{prelude::*, Snafu};

use std::fs;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{BallotCommand, Command, TiebreakerCommand, VotersCommand};
use crate::Args;

pub mod file_store;
mod io_common;
mod io_voters;

use crate::scrutiny::file_store::FileStore;
use crate::scrutiny::io_common::{ballot_line, fill_draft, search_voters};

#[derive(Debug, Snafu)]
pub enum TallyCliError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("No worksheet found in {path}"))]
    EmptyExcel { path: String },
    #[snafu(display("{path} has {found} columns, expected name, surnames and location"))]
    MissingColumns { path: String, found: usize },
    #[snafu(display("Error opening file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading line {lineno}"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("Error accessing {path}"))]
    Io {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error reading JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("{source}"))]
    Tally { source: TallyErrors },
    #[snafu(display("No voter matches {choice}"))]
    UnknownVoter { choice: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type TallyCliResult<T> = Result<T, TallyCliError>;

/// Backups expire after 12 hours.
pub const BACKUP_EXPIRATION_HOURS: i64 = 12;

/// Shows the notifications on the terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&mut self, message: &str) {
        warn!("{}", message);
        eprintln!("{}", message);
    }
}

fn require_configuration<S: ConfigurationSource>(store: &S) -> TallyCliResult<Configuration> {
    match store.get_configuration().context(TallySnafu {})? {
        Some(config) => Ok(config),
        None => Err(TallyErrors::MissingConfiguration).context(TallySnafu {}),
    }
}

pub fn run(args: &Args) -> TallyCliResult<()> {
    let mut store = FileStore::open(&args.workspace)?;
    match &args.command {
        Command::Voters(cmd) => run_voters(&mut store, cmd),
        Command::Configure {
            delegates,
            votes,
            electoral_area,
            election_date,
            election_type,
            scrutineers,
            comments,
        } => configure(
            &mut store,
            Configuration {
                delegates: *delegates,
                votes: *votes,
                electoral_area: electoral_area.clone(),
                election_date: election_date.clone(),
                election_type: election_type.clone(),
                scrutineers_names: scrutineers.clone(),
                comments: comments.clone(),
            },
        ),
        Command::Ballot(cmd) => run_ballot(store, cmd),
        Command::Results { out, reference } => run_results(&store, out.clone(), reference.clone()),
        Command::Tiebreaker(cmd) => run_tiebreaker(&mut store, cmd),
        Command::Backup => {
            let snapshot = backup(&mut store)?;
            store.set_unlocked(false)?;
            println!("Backup made at {}", snapshot.backup_at);
            Ok(())
        }
        Command::Restore => {
            if restore(&mut store)? {
                store.set_unlocked(false)?;
                println!("Backup restored");
                Ok(())
            } else {
                whatever!("No backup to restore")
            }
        }
    }
}

// ********* Voters and configuration **********

fn run_voters(store: &mut FileStore, cmd: &VotersCommand) -> TallyCliResult<()> {
    match cmd {
        VotersCommand::Import { path, worksheet } => {
            let voters = io_voters::read_voters(path, worksheet.as_deref())?;
            if voters.is_empty() {
                whatever!("No voter found in {}", path);
            }
            store.replace_all_voters(&voters).context(TallySnafu {})?;
            println!("{} voters imported", voters.len());
        }
        VotersCommand::List { search } => {
            let voters = store.get_all_voters().context(TallySnafu {})?;
            let shown: Vec<&Person> = match search {
                Some(term) => search_voters(&voters, term),
                None => voters.iter().collect(),
            };
            for p in shown {
                println!("{}\t{}\t{}", p.id, p.full_name(), p.location);
            }
        }
    }
    Ok(())
}

fn configure<S: ConfigurationSource>(store: &mut S, config: Configuration) -> TallyCliResult<()> {
    if config.delegates == 0 || config.votes == 0 {
        whatever!("The number of delegates and the number of votes must be positive");
    }
    info!("configure: {:?}", config);
    store.save_configuration(&config).context(TallySnafu {})
}

// ********* Main ballots **********

fn run_ballot(store: FileStore, cmd: &BallotCommand) -> TallyCliResult<()> {
    let unlocked = store.is_unlocked()?;
    let mut book = BallotBook::new(store, ImpactReevaluator::new(ConsoleNotifier));
    if unlocked {
        book.unlock().context(TallySnafu {})?;
    }
    match cmd {
        BallotCommand::Cast { choices } => {
            let draft = main_draft(book.store(), choices)?;
            let ballot = book
                .cast_ballot(draft.into_main_votes())
                .context(TallySnafu {})?;
            println!("Ballot {} cast", ballot.number);
        }
        BallotCommand::Null => {
            let ballot = book.cast_null_ballot().context(TallySnafu {})?;
            println!("Null ballot {} cast", ballot.number);
        }
        BallotCommand::Edit { number, choices } => {
            let draft = main_draft(book.store(), choices)?;
            book.update_ballot(*number, draft.into_main_votes())
                .context(TallySnafu {})?;
            println!("Ballot {} updated", number);
        }
        BallotCommand::Delete { number } => {
            book.delete_ballot(*number).context(TallySnafu {})?;
            println!("Ballot {} deleted", number);
        }
        BallotCommand::Unlock => {
            book.unlock().context(TallySnafu {})?;
            book.store_mut().set_unlocked(true)?;
            println!("Cast ballots can be edited");
        }
        BallotCommand::List => {
            for b in book.ballots().context(TallySnafu {})? {
                println!("{}", ballot_line(&b));
            }
        }
    }
    if let Some(ImpactVerdict::Invalidated { previous, current }) = book.last_verdict().cloned() {
        info!(
            "run_ballot: tiebreaker between {:?} discarded, now tied: {:?}",
            previous, current
        );
        book.store_mut().set_unlocked(false)?;
    }
    Ok(())
}

fn main_draft(store: &FileStore, choices: &[String]) -> TallyCliResult<BallotDraft> {
    let config = require_configuration(store)?;
    let voters = store.get_all_voters().context(TallySnafu {})?;
    let mut draft = BallotDraft::new(config.votes as usize);
    fill_draft(&mut draft, &voters, choices)?;
    Ok(draft)
}

// ********* Results **********

fn tiebreaker_js(state: &TiebreakerState) -> JSValue {
    let rounds: Vec<JSValue> = state
        .rounds
        .iter()
        .map(|r| {
            json!({
                "round": r.round_number,
                "tiedCandidates": r.tied_candidates,
                "winnersNeeded": r.winners_needed,
                "ballots": r.ballots.len(),
                "tally": r.results,
                "clearWinners": r.clear_winners,
                "stillTied": r.still_tied,
                "completed": r.completed,
            })
        })
        .collect();
    json!({
        "rounds": rounds,
        "completed": state.completed,
        "finalDelegates": state.final_delegates,
    })
}

/// The summary of the election: configuration, statistics, delegate table and tiebreaker.
///
/// Ids and timestamps are left out, so that two summaries of the same ballots compare equal.
pub fn build_summary_js<S>(store: &S) -> TallyCliResult<JSValue>
where
    S: BallotSource + VoterDirectory + ConfigurationSource + TiebreakerStore,
{
    let config = require_configuration(store)?;
    let ballots = store.get_all_ballots().context(TallySnafu {})?;
    let voters = store.get_all_voters().context(TallySnafu {})?;
    let tiebreaker = store.get_tiebreaker_data().context(TallySnafu {})?;

    let ranking = compute_ranking(&ballots);
    let final_delegates = tiebreaker
        .as_ref()
        .and_then(|s| s.final_delegates.as_deref());
    let rows = result_rows(&ranking, final_delegates, config.delegates);
    let stats = compute_statistics(&ballots, voters.len(), Some(&config));
    let info = extract_initial_tiebreaker_info(&ranking, config.delegates);
    let pending_tie = has_tie(&info) && final_delegates.is_none();
    debug!("build_summary_js: rows: {:?}", rows);
    let pending_tie_js = if pending_tie {
        json!(info.tied_candidates)
    } else {
        JSValue::Null
    };

    Ok(json!({
        "config": {
            "delegates": config.delegates,
            "votes": config.votes,
            "electoralArea": config.electoral_area,
            "electionDate": config.election_date,
            "electionType": config.election_type,
        },
        "statistics": stats,
        "results": rows,
        "pendingTie": pending_tie_js,
        "tiebreaker": tiebreaker.as_ref().map(tiebreaker_js),
    }))
}

pub fn read_summary(path: String) -> TallyCliResult<JSValue> {
    let contents = fs::read_to_string(path.clone()).context(IoSnafu { path })?;
    debug!("read_summary: content: {:?}", contents);
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

fn run_results(
    store: &FileStore,
    out: Option<String>,
    check_summary_path: Option<String>,
) -> TallyCliResult<()> {
    let result_js = build_summary_js(store)?;
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;

    match out.as_deref() {
        None => {}
        Some("stdout") => println!("{}", pretty_js_stats),
        Some(path) => {
            fs::write(path, &pretty_js_stats).context(IoSnafu { path })?;
            info!("run_results: summary written to {:?}", path);
        }
    }

    if let Some(rows) = result_js["results"].as_array() {
        for row in rows {
            let mark = match (row["elected"].as_bool(), row["byTiebreaker"].as_bool()) {
                (Some(true), Some(true)) => "* (tiebreaker)",
                (Some(true), _) => "*",
                _ => "",
            };
            println!(
                "{}\t{}\t{}",
                row["name"].as_str().unwrap_or_default(),
                row["votes"],
                mark
            );
        }
    }
    if let Some(tied) = result_js["pendingTie"].as_array() {
        println!(
            "Tie at the cutoff between {} candidates, a tiebreaker is needed",
            tied.len()
        );
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = check_summary_path {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }
    Ok(())
}

// ********* Tiebreaker **********

fn print_status(session: &TiebreakerSession) {
    let state = session.state();
    if let Some(finals) = &state.final_delegates {
        println!("Tiebreaker completed after {} rounds", state.rounds.len());
        for d in finals {
            let how = if d.by_tiebreaker { " (tiebreaker)" } else { "" };
            println!("{}. {}{}", d.position, d.name, how);
        }
        return;
    }
    println!(
        "Round {}: {} seats between {}",
        session.current_round_number(),
        session.winners_needed(),
        session.tied_candidates().join(", ")
    );
    for d in &state.confirmed_delegates {
        println!("{}. {} (confirmed)", d.position, d.name);
    }
    for b in session.pending_ballots() {
        println!("{}", ballot_line(b));
    }
}

fn print_round_results(session: &TiebreakerSession) {
    if let Some(results) = session.round_results() {
        for entry in &results.sorted {
            println!("{}\t{}", entry.name, entry.votes);
        }
        if results.outcome.is_resolved {
            println!("The round decides the remaining seats");
        } else {
            println!(
                "Still tied for {} seats: {}",
                results.outcome.next_winners_needed,
                results.outcome.still_tied.join(", ")
            );
        }
    }
}

/// A tiebreaker is only played when more candidates share the cutoff than there are seats.
fn ensure_tie(session: &TiebreakerSession) -> TallyCliResult<()> {
    let state = session.state();
    if state.completed {
        return Err(TallyErrors::TiebreakerCompleted).context(TallySnafu {});
    }
    let info = InitialTiebreakerInfo {
        confirmed_delegates: state.confirmed_delegates.clone(),
        tied_candidates: state.current_tied_candidates.clone(),
        winners_needed: state.current_winners_needed,
    };
    if state.rounds.is_empty() && !has_tie(&info) {
        whatever!("There is no tie to break");
    }
    Ok(())
}

fn run_tiebreaker(store: &mut FileStore, cmd: &TiebreakerCommand) -> TallyCliResult<()> {
    require_configuration(&*store)?;
    let mut session = TiebreakerSession::open(&*store).context(TallySnafu {})?;
    match cmd {
        TiebreakerCommand::Status => {
            if session.phase() != Phase::Completed && ensure_tie(&session).is_err() {
                println!("There is no tie to break");
                return Ok(());
            }
            print_status(&session);
        }
        TiebreakerCommand::Cast { choices } => {
            ensure_tie(&session)?;
            let voters = store.get_all_voters().context(TallySnafu {})?;
            fill_draft(session.draft_mut(), &voters, choices)?;
            let ballot = session.submit_draft(store).context(TallySnafu {})?;
            println!(
                "Round {} ballot {} cast",
                session.current_round_number(),
                ballot.number
            );
        }
        TiebreakerCommand::Edit { number, choices } => {
            ensure_tie(&session)?;
            let idx = (*number as usize).saturating_sub(1);
            let previous = session
                .pending_ballots()
                .get(idx)
                .cloned()
                .ok_or_else(|| TallyErrors::UnknownBallot(format!("#{}", number)))
                .context(TallySnafu {})?;
            let voters = store.get_all_voters().context(TallySnafu {})?;
            let mut draft =
                BallotDraft::from_votes(&previous.votes, session.winners_needed() as usize);
            fill_draft(&mut draft, &voters, choices)?;
            if !draft.is_complete() {
                return Err(TallyErrors::IncompleteBallot).context(TallySnafu {});
            }
            session.edit_round_ballot(store, idx).context(TallySnafu {})?;
            *session.draft_mut() = draft;
            session.submit_draft(store).context(TallySnafu {})?;
            println!("Round ballot {} replaced", number);
        }
        TiebreakerCommand::Delete { number } => {
            ensure_tie(&session)?;
            let id = session
                .pending_ballots()
                .get((*number as usize).saturating_sub(1))
                .map(|b| b.id.clone())
                .ok_or_else(|| TallyErrors::UnknownBallot(format!("#{}", number)))
                .context(TallySnafu {})?;
            session
                .delete_round_ballot(store, &id)
                .context(TallySnafu {})?;
            println!("Round ballot {} deleted", number);
        }
        TiebreakerCommand::Compute => {
            ensure_tie(&session)?;
            session.compute_results().context(TallySnafu {})?;
            print_round_results(&session);
        }
        TiebreakerCommand::Finish => {
            ensure_tie(&session)?;
            session.compute_results().context(TallySnafu {})?;
            print_round_results(&session);
            session.finish_round(store).context(TallySnafu {})?;
            if session.phase() == Phase::Completed {
                store.set_unlocked(false)?;
            }
            print_status(&session);
        }
        TiebreakerCommand::Back => {
            ensure_tie(&session)?;
            session.compute_results().context(TallySnafu {})?;
            session.back_to_voting(store).context(TallySnafu {})?;
            println!(
                "Ballots of round {} discarded",
                session.current_round_number()
            );
        }
        TiebreakerCommand::Restart => {
            store.set_unlocked(false)?;
            let main_results = build_main_results(&*store).context(TallySnafu {})?;
            let info = extract_initial_tiebreaker_info(
                &main_results,
                store.delegates().context(TallySnafu {})?,
            );
            if !has_tie(&info) {
                store.clear_tiebreaker_data().context(TallySnafu {})?;
                println!("There is no tie to break");
                return Ok(());
            }
            session.restart(store).context(TallySnafu {})?;
            print_status(&session);
        }
    }
    Ok(())
}

// ********* Backups **********

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    #[serde(rename = "backupAt")]
    pub backup_at: DateTime<Utc>,
    pub voters: Vec<Person>,
    pub configuration: Option<Configuration>,
    pub ballots: Vec<Ballot>,
    #[serde(rename = "tieBreaker")]
    pub tiebreaker: Option<TiebreakerState>,
}

pub fn has_active_data<S: KeyValueStore>(store: &S) -> TallyCliResult<bool> {
    Ok(!store.get_all_voters().context(TallySnafu {})?.is_empty()
        || !store.get_all_ballots().context(TallySnafu {})?.is_empty()
        || store.get_configuration().context(TallySnafu {})?.is_some())
}

/// Moves the data of the election into the backup, leaving an empty workspace.
pub fn backup<S: KeyValueStore>(store: &mut S) -> TallyCliResult<BackupSnapshot> {
    if !has_active_data(store)? {
        whatever!("There is no data to back up");
    }
    let snapshot = BackupSnapshot {
        backup_at: Utc::now(),
        voters: store.get_all_voters().context(TallySnafu {})?,
        configuration: store.get_configuration().context(TallySnafu {})?,
        ballots: store.get_all_ballots().context(TallySnafu {})?,
        tiebreaker: store.get_tiebreaker_data().context(TallySnafu {})?,
    };
    write_value(store, StorageKey::Backup, &snapshot).context(TallySnafu {})?;
    for key in StorageKey::ACTIVE {
        store.remove(key).context(TallySnafu {})?;
    }
    info!("backup: backup made at {}", snapshot.backup_at);
    Ok(snapshot)
}

/// The last backup, unless it has expired.
pub fn last_backup<S: KeyValueStore>(
    store: &S,
    now: DateTime<Utc>,
) -> TallyCliResult<Option<BackupSnapshot>> {
    let snapshot: Option<BackupSnapshot> =
        read_value(store, StorageKey::Backup).context(TallySnafu {})?;
    match snapshot {
        Some(s) if now - s.backup_at > Duration::hours(BACKUP_EXPIRATION_HOURS) => {
            warn!("last_backup: backup from {} has expired", s.backup_at);
            Ok(None)
        }
        x => Ok(x),
    }
}

/// Puts the last backup back in place. Returns false when there is none.
pub fn restore<S: KeyValueStore>(store: &mut S) -> TallyCliResult<bool> {
    let snapshot = match last_backup(store, Utc::now())? {
        Some(s) => s,
        None => return Ok(false),
    };
    store
        .replace_all_voters(&snapshot.voters)
        .context(TallySnafu {})?;
    match &snapshot.configuration {
        Some(c) => store.save_configuration(c).context(TallySnafu {})?,
        None => store
            .remove(StorageKey::Configuration)
            .context(TallySnafu {})?,
    }
    store
        .replace_all_ballots(&snapshot.ballots)
        .context(TallySnafu {})?;
    match &snapshot.tiebreaker {
        Some(t) => store.save_tiebreaker_data(t).context(TallySnafu {})?,
        None => store.clear_tiebreaker_data().context(TallySnafu {})?,
    }
    info!("restore: backup from {} restored", snapshot.backup_at);
    Ok(true)
}
