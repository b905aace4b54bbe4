use clap::{Parser, Subcommand, ValueEnum};

/// Collects the roll-call votes of the Bundestag and normalizes them into tables.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file with the pipeline settings. Every
    /// setting has a default, see the README for the keys.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory, optional) The root of the data store. Overrides the
    /// dataDir setting of the configuration file.
    #[clap(long, value_parser)]
    pub data_dir: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceArg {
    /// The spreadsheets published by the Bundestag.
    Sheets,
    /// The abgeordnetenwatch.de API.
    Api,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityArg {
    Polls,
    Mandates,
    Votes,
    All,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetches the raw data of a source into the store.
    Download {
        #[clap(value_enum)]
        source: SourceArg,
        /// (api only) The legislature to fetch, for example 111 for the 19th Bundestag.
        #[clap(value_parser)]
        legislature_id: Option<u64>,
        /// (api only) Which entities to fetch. Votes need the polls to be fetched first.
        #[clap(long, value_enum, default_value = "all")]
        entity: EntityArg,
        /// Lists what would be fetched without writing anything.
        #[clap(long, takes_value = false)]
        dry_run: bool,
        /// Fetches again what is already on disk.
        #[clap(long, takes_value = false)]
        force: bool,
        /// (sheets only) The maximum number of sheets to download in this run.
        #[clap(long, value_parser)]
        max_downloads: Option<usize>,
        /// (api only) The maximum number of polls to list.
        #[clap(long, value_parser)]
        max_polls: Option<u32>,
        /// (api only) The maximum number of mandates to list.
        #[clap(long, value_parser)]
        max_mandates: Option<u32>,
    },
    /// Parses the raw data of a source and writes the tables.
    Transform {
        #[clap(value_enum)]
        source: SourceArg,
        /// The legislative period (sheets, optional) or the legislature id (api).
        #[clap(value_parser)]
        id: Option<u64>,
        /// Rebuilds the tables even when they exist.
        #[clap(long, takes_value = false)]
        force: bool,
    },
    /// Repairs the vote files whose fraction is an empty list.
    Fix {
        #[clap(value_parser)]
        legislature_id: u64,
        /// Shows the changes without writing them.
        #[clap(long, takes_value = false)]
        dry_run: bool,
    },
}
