use std::collections::BTreeMap;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;

use crate::error::FetchError;
use crate::fetch::FetchOutcome;
use crate::record::{Offense, Record};
use crate::{Error, Result};

/// Admin key holding the ID as the remote source prints it.
const ID_KEY: &str = "TDCJ Number";

/// Compiled selectors for the result page.
#[derive(Debug)]
pub struct Selectors {
    table: Selector,
    row: Selector,
    header: Selector,
    cell: Selector,
    admin: Selector,
}

impl Selectors {
    pub fn new() -> Result<Self> {
        Ok(Self {
            table: create_selector("table.tdcj_table")?,
            row: create_selector("tr")?,
            header: create_selector("th")?,
            cell: create_selector("td")?,
            admin: create_selector("#content_right p")?,
        })
    }
}

/// Parses the page on a blocking thread.
/// A page without a result table means the ID is unassigned.
pub(crate) async fn parse_result_page(
    id: u64,
    html: String,
    selectors: Arc<Selectors>,
) -> core::result::Result<FetchOutcome, FetchError> {
    spawn_blocking(move || parse_document(id, &html, &selectors))
        .await
        .map_err(|e| FetchError::Parse(format!("parser task failed: {e}")))?
}

pub(crate) fn parse_document(
    id: u64,
    html: &str,
    sel: &Selectors,
) -> core::result::Result<FetchOutcome, FetchError> {
    let doc = Html::parse_document(html);

    let Some(table) = doc.select(&sel.table).next() else {
        return Ok(FetchOutcome::NotFound);
    };
    let offenses = parse_offenses(table, sel);

    let mut admin = BTreeMap::new();
    for p in doc.select(&sel.admin) {
        for line in p.text().flat_map(str::lines) {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    admin.insert(key.to_owned(), value.trim().to_owned());
                }
            }
        }
    }
    if admin.is_empty() {
        return Err(FetchError::Parse(format!(
            "id {id}: result table present but admin section is empty"
        )));
    }

    if let Some(printed) = admin.get(ID_KEY) {
        match printed.trim_start_matches('0').parse::<u64>() {
            Ok(n) if n == id => {}
            Ok(n) => {
                return Err(FetchError::Parse(format!(
                    "asked for id {id} but page shows {n}"
                )))
            }
            Err(_) if printed.chars().all(|c| c == '0') && id == 0 => {}
            Err(_) => {
                return Err(FetchError::Parse(format!(
                    "id {id}: unreadable {ID_KEY} {printed:?}"
                )))
            }
        }
    }

    Ok(FetchOutcome::Found(Record::new(id, admin, offenses)))
}

fn parse_offenses(table: ElementRef<'_>, sel: &Selectors) -> Vec<Offense> {
    let mut columns: Vec<String> = Vec::new();
    let mut offenses = Vec::new();

    for row in table.select(&sel.row) {
        let headers: Vec<String> = row.select(&sel.header).map(cell_text).collect();
        if !headers.is_empty() {
            columns = headers;
            continue;
        }

        let mut offense = Offense::default();
        for (column, cell) in columns.iter().zip(row.select(&sel.cell)) {
            let value = cell_text(cell);
            match normalize_column(column).as_str() {
                "offense date" => offense.offense_date = value,
                "offense" => offense.offense = value,
                "sentence date" => offense.sentence_date = value,
                "county" => offense.county = value,
                "case no" => offense.case_no = value,
                c if c.starts_with("sentence") => offense.sentence = value,
                _ => {}
            }
        }
        if offense != Offense::default() {
            offenses.push(offense);
        }
    }
    offenses
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

#[inline]
fn normalize_column(column: &str) -> String {
    column.trim().trim_end_matches('.').to_lowercase()
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseInvalidSelector(sel_str.into()))
}
