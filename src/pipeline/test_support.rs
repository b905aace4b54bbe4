//! Test doubles for the network and the workbook reader.

use crate::pipeline::config_reader::{validate_config, Overrides, PipelineConfig};
use crate::pipeline::io_http::Transport;
use crate::pipeline::io_sheets::{SheetGrid, WorkbookLoader};
use crate::pipeline::store::ArtifactStore;
use crate::pipeline::*;

use calamine::DataType;
use std::cell::RefCell;
use std::collections::HashMap;
use url::Url;

pub fn store_in(dir: &Path) -> ArtifactStore {
    ArtifactStore::new(&settings_in(dir))
}

pub fn settings_in(dir: &Path) -> config_reader::Settings {
    let overrides = Overrides {
        data_dir: Some(dir.display().to_string()),
        ..Overrides::default()
    };
    let mut settings = validate_config(&PipelineConfig::default(), &overrides).unwrap();
    settings.request_delay = std::time::Duration::ZERO;
    settings.sheet_delay = std::time::Duration::ZERO;
    settings.jitter = std::time::Duration::ZERO;
    settings
}

/// Answers requests from a function and records every requested URL.
pub struct StubTransport {
    respond: Box<dyn Fn(&Url) -> Option<Vec<u8>>>,
    calls: RefCell<Vec<String>>,
}

impl StubTransport {
    pub fn new<F>(respond: F) -> StubTransport
    where
        F: Fn(&Url) -> Option<Vec<u8>> + 'static,
    {
        StubTransport {
            respond: Box::new(respond),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Transport for StubTransport {
    fn get(&self, url: &Url) -> PipelineResult<Vec<u8>> {
        self.calls.borrow_mut().push(url.to_string());
        match (self.respond)(url) {
            Some(bytes) => Ok(bytes),
            None => HttpStatusSnafu {
                url: url.as_str(),
                status: 404u16,
            }
            .fail(),
        }
    }
}

/// Serves workbooks from memory, by file name.
#[derive(Default)]
pub struct InMemoryLoader {
    pub grids: HashMap<String, SheetGrid>,
}

impl InMemoryLoader {
    pub fn with(mut self, file_name: &str, grid: SheetGrid) -> InMemoryLoader {
        self.grids.insert(file_name.to_string(), grid);
        self
    }
}

impl WorkbookLoader for InMemoryLoader {
    fn load(&self, path: &Path) -> PipelineResult<SheetGrid> {
        let name = simplify_file_name(path)?;
        match self.grids.get(&name) {
            Some(grid) => Ok(grid.clone()),
            None => EmptyExcelSnafu {
                path: path.display().to_string(),
            }
            .fail(),
        }
    }
}

pub const SHEET_HEADER: [&str; 15] = [
    "Wahlperiode",
    "Sitzungnr",
    "Abstimmnr",
    "Fraktion/Gruppe",
    "Name",
    "Vorname",
    "Titel",
    "ja",
    "nein",
    "Enthaltung",
    "ungültig",
    "nichtabgegeben",
    "Bezeichnung",
    "Bemerkung",
    "Extra",
];

/// A sheet with the published header, one row per (surname, faction, outcome column).
pub fn sheet_grid(members: &[(&str, &str, &str)]) -> SheetGrid {
    let mut rows: Vec<Vec<DataType>> = vec![SHEET_HEADER
        .iter()
        .map(|h| DataType::String(h.to_string()))
        .collect()];
    for (surname, faction, outcome) in members.iter() {
        let mut row = vec![
            DataType::Float(19.0),
            DataType::Float(176.0),
            DataType::Int(1),
            DataType::String(faction.to_string()),
            DataType::String(surname.to_string()),
            DataType::String("Jo".to_string()),
            DataType::Empty,
        ];
        for column in ["ja", "nein", "Enthaltung", "ungültig", "nichtabgegeben"] {
            row.push(if column == *outcome {
                DataType::Float(1.0)
            } else {
                DataType::Float(0.0)
            });
        }
        row.push(DataType::String(format!("{}, Jo", surname)));
        row.push(DataType::Empty);
        row.push(DataType::String("ignored".to_string()));
        rows.push(row);
    }
    SheetGrid {
        sheet_names: vec!["Tabelle1".to_string()],
        rows,
    }
}
