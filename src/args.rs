use clap::{Parser, Subcommand};

/// This is a tallying program for delegate elections, with runoff rounds to break ties.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (directory, default: current directory) The directory holding the data of the election.
    #[clap(short, long, value_parser, default_value = ".")]
    pub workspace: String,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Imports or lists the members of the assembly.
    #[clap(subcommand)]
    Voters(VotersCommand),

    /// Sets the configuration of the election.
    Configure {
        /// The number of delegates to elect.
        #[clap(long, value_parser)]
        delegates: u32,
        /// The number of vote slots on each ballot.
        #[clap(long, value_parser)]
        votes: u32,
        #[clap(long, value_parser)]
        electoral_area: Option<String>,
        #[clap(long, value_parser)]
        election_date: Option<String>,
        #[clap(long, value_parser)]
        election_type: Option<String>,
        /// (list of comma-separated names) The scrutineers of the election.
        #[clap(long, value_parser, value_delimiter = ',')]
        scrutineers: Vec<String>,
        #[clap(long, value_parser)]
        comments: Option<String>,
    },

    /// Casts and corrects the main ballots.
    #[clap(subcommand)]
    Ballot(BallotCommand),

    /// Computes the results of the election.
    Results {
        /// (file path, 'stdout' or empty) If specified, the summary of the election will be written in JSON format to the given
        /// location.
        #[clap(short, long, value_parser)]
        out: Option<String>,
        /// (file path) A reference file containing a previous summary in JSON format. If provided, the program will
        /// check that the computed summary matches the reference.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },

    /// Runs the runoff rounds between the candidates tied at the cutoff.
    #[clap(subcommand)]
    Tiebreaker(TiebreakerCommand),

    /// Moves all the data of the workspace into a backup.
    Backup,

    /// Restores the last backup.
    Restore,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VotersCommand {
    /// Replaces the voter list with the content of an Excel (.xlsx) or CSV file.
    Import {
        #[clap(value_parser)]
        path: String,
        /// The name of the worksheet to read in an Excel file, the first one by default.
        #[clap(long, value_parser)]
        worksheet: Option<String>,
    },
    List {
        /// Only shows the voters whose name contains this text.
        #[clap(long, value_parser)]
        search: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BallotCommand {
    /// Casts a ballot. Each choice is a voter id or a full name, `_` for an empty slot or
    /// `invalid:LABEL` for an invalid name.
    Cast {
        #[clap(value_parser)]
        choices: Vec<String>,
    },
    /// Casts a null ballot.
    Null,
    /// Replaces the choices of a cast ballot.
    Edit {
        #[clap(value_parser)]
        number: u32,
        #[clap(value_parser)]
        choices: Vec<String>,
    },
    Delete {
        #[clap(value_parser)]
        number: u32,
    },
    /// Allows the correction of cast ballots while a tiebreaker exists.
    Unlock,
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TiebreakerCommand {
    Status,
    /// Casts a round ballot, with one choice per seat still open.
    Cast {
        #[clap(value_parser)]
        choices: Vec<String>,
    },
    /// Replaces the choices of a round ballot.
    Edit {
        #[clap(value_parser)]
        number: u32,
        #[clap(value_parser)]
        choices: Vec<String>,
    },
    Delete {
        #[clap(value_parser)]
        number: u32,
    },
    /// Shows the tally of the round in progress.
    Compute,
    /// Tallies the round in progress and records it.
    Finish,
    /// Discards the ballots of the round in progress.
    Back,
    /// Discards the tiebreaker and starts again from the current results.
    Restart,
}
