use crate::pipeline::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;
use vote_records::PartyCanon;

/// The JSON configuration file. Every entry is optional.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "dataDir")]
    pub data_dir: Option<String>,
    #[serde(rename = "rawDir")]
    pub raw_dir: Option<String>,
    #[serde(rename = "preprocessedDir")]
    pub preprocessed_dir: Option<String>,
    #[serde(rename = "sheetsSource")]
    pub sheets_source: Option<String>,
    #[serde(rename = "apiSource")]
    pub api_source: Option<String>,
    #[serde(rename = "sheetBaseUrl")]
    pub sheet_base_url: Option<String>,
    #[serde(rename = "apiBaseUrl")]
    pub api_base_url: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
    #[serde(rename = "maxPolls")]
    pub max_polls: Option<u32>,
    #[serde(rename = "maxMandates")]
    pub max_mandates: Option<u32>,
    #[serde(rename = "maxVotesPerPoll")]
    pub max_votes_per_poll: Option<u32>,
    #[serde(rename = "requestDelayMs")]
    pub request_delay_ms: Option<u64>,
    #[serde(rename = "sheetDelayMs")]
    pub sheet_delay_ms: Option<u64>,
    #[serde(rename = "jitterMs")]
    pub jitter_ms: Option<u64>,
    #[serde(rename = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
    #[serde(rename = "maxDownloads")]
    pub max_downloads: Option<usize>,
    #[serde(rename = "partyAliases")]
    pub party_aliases: Option<BTreeMap<String, String>>,
}

/// Values given on the command line. They take precedence over the file.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub max_downloads: Option<usize>,
    pub max_polls: Option<u32>,
    pub max_mandates: Option<u32>,
}

/// The validated configuration used by every stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub raw_dir: String,
    pub preprocessed_dir: String,
    pub sheets_source: String,
    pub api_source: String,
    pub sheet_base_url: Url,
    pub api_base_url: Url,
    pub page_size: u32,
    pub max_polls: u32,
    pub max_mandates: u32,
    pub max_votes_per_poll: u32,
    pub request_delay: Duration,
    pub sheet_delay: Duration,
    pub jitter: Duration,
    pub timeout: Duration,
    pub max_downloads: Option<usize>,
    pub party_canon: PartyCanon,
}

pub fn read_config(path: Option<&str>) -> PipelineResult<PipelineConfig> {
    match path {
        None => Ok(PipelineConfig::default()),
        Some(p) => {
            info!("read_config: reading {}", p);
            let contents = fs::read_to_string(p).context(ReadingFileSnafu { path: p })?;
            let config: PipelineConfig =
                serde_json::from_str(&contents).context(ParsingJsonSnafu { path: p })?;
            debug!("read_config: {:?}", config);
            Ok(config)
        }
    }
}

// Url::join drops the last segment of a base without a trailing slash.
fn parse_base_url(value: &str) -> PipelineResult<Url> {
    let with_slash = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{}/", value)
    };
    Url::parse(&with_slash).context(InvalidUrlSnafu { url: value })
}

pub fn validate_config(config: &PipelineConfig, overrides: &Overrides) -> PipelineResult<Settings> {
    let page_size = config.page_size.unwrap_or(100);
    if page_size == 0 {
        whatever!("pageSize must be positive");
    }
    let party_canon = match &config.party_aliases {
        Some(aliases) => PartyCanon::with_aliases(aliases).context(PartyAliasesSnafu {})?,
        None => PartyCanon::default(),
    };
    let data_dir = overrides
        .data_dir
        .clone()
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| "data".to_string());
    Ok(Settings {
        data_dir: PathBuf::from(data_dir),
        raw_dir: config.raw_dir.clone().unwrap_or_else(|| "raw".to_string()),
        preprocessed_dir: config
            .preprocessed_dir
            .clone()
            .unwrap_or_else(|| "preprocessed".to_string()),
        sheets_source: config
            .sheets_source
            .clone()
            .unwrap_or_else(|| "bundestag".to_string()),
        api_source: config
            .api_source
            .clone()
            .unwrap_or_else(|| "abgeordnetenwatch".to_string()),
        sheet_base_url: parse_base_url(
            config
                .sheet_base_url
                .as_deref()
                .unwrap_or("https://www.bundestag.de"),
        )?,
        api_base_url: parse_base_url(
            config
                .api_base_url
                .as_deref()
                .unwrap_or("https://www.abgeordnetenwatch.de/api/v2/"),
        )?,
        page_size,
        max_polls: overrides.max_polls.or(config.max_polls).unwrap_or(999),
        max_mandates: overrides.max_mandates.or(config.max_mandates).unwrap_or(999),
        max_votes_per_poll: config.max_votes_per_poll.unwrap_or(999),
        request_delay: Duration::from_millis(config.request_delay_ms.unwrap_or(1000)),
        sheet_delay: Duration::from_millis(config.sheet_delay_ms.unwrap_or(10)),
        jitter: Duration::from_millis(config.jitter_ms.unwrap_or(100)),
        timeout: Duration::from_secs(config.timeout_secs.unwrap_or(42)),
        max_downloads: overrides.max_downloads.or(config.max_downloads),
        party_canon,
    })
}
