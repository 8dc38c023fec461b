//! Tableau presentation-model decoder.
//!
//! The bootstrap response is two length-prefixed JSON documents,
//! `<len>;{info}<len>;{data}`. The data document carries the value
//! dictionary (data segments) and each worksheet's pane columns. Command
//! responses carry new data segments plus the dashboard zones, whose
//! worksheets replace the model's.
//!
//! Cells are resolved through the dictionary: a column's value indices
//! address the values of its data type, alias indices do too unless
//! negative, in which case `-i` addresses `cstring[i - 1]`.

use serde_json::{Map, Value};
use tracing::debug;

use super::{DataColumn, DataDictionary, PayloadDecoder, Row, Workbook, WorksheetData};
use crate::error::DecodeError;

const SEGMENTS_PATH: &str =
    "/secondaryInfo/presModelMap/dataDictionary/presModelHolder/genDataDictionaryPresModel/dataSegments";
const WORKSHEETS_PATH: &str =
    "/secondaryInfo/presModelMap/vizData/presModelHolder/genPresModelMapPresModel/presModelMap";
const WORKSHEET_COLUMNS_PATH: &str = "/presModelHolder/genVizDataPresModel/paneColumnsData";
const APPLICATION_PATH: &str = "/vqlCmdResponse/layoutStatus/applicationPresModel";
const UPDATE_SEGMENTS_PATH: &str = "/dataDictionary/dataSegments";
const ZONES_PATH: &str = "/workbookPresModel/dashboardPresModel/zones";
const ZONE_COLUMNS_PATH: &str = "/presModelHolder/visual/vizData/paneColumnsData";

/// Decoder for Tableau `bootstrapSession` and command responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableauDecoder;

impl TableauDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadDecoder for TableauDecoder {
    fn decode(&self, bootstrap: &str) -> Result<Workbook, DecodeError> {
        let (_info, data) = split_bootstrap(bootstrap)?;

        let dictionary = match data.pointer(SEGMENTS_PATH) {
            Some(segments) => parse_segments(segments)?,
            None => DataDictionary::new(),
        };

        let mut worksheets = Vec::new();
        if let Some(sheets) = data.pointer(WORKSHEETS_PATH).and_then(Value::as_object) {
            for (name, sheet) in sheets {
                let Some(columns) = sheet.pointer(WORKSHEET_COLUMNS_PATH) else {
                    continue;
                };
                worksheets.push(build_worksheet(name, columns, &dictionary)?);
            }
        }

        debug!(
            worksheets = worksheets.len(),
            segments = dictionary.segment_count(),
            "Decoded bootstrap payload"
        );
        Ok(Workbook {
            worksheets,
            dictionary,
        })
    }

    fn apply_update(&self, model: &Workbook, update: &str) -> Result<Workbook, DecodeError> {
        let data: Value = serde_json::from_str(update)?;
        let mut dictionary = model.dictionary.clone();

        let Some(application) = data.pointer(APPLICATION_PATH) else {
            debug!("Update without application model");
            return Ok(Workbook {
                worksheets: Vec::new(),
                dictionary,
            });
        };

        if let Some(segments) = application.pointer(UPDATE_SEGMENTS_PATH) {
            dictionary.merge(&parse_segments(segments)?);
        }

        let mut worksheets = Vec::new();
        if let Some(zones) = application.pointer(ZONES_PATH).and_then(Value::as_object) {
            for zone in ordered_zones(zones) {
                let Some(name) = zone.get("worksheet").and_then(Value::as_str) else {
                    continue;
                };
                let Some(columns) = zone.pointer(ZONE_COLUMNS_PATH) else {
                    continue;
                };
                worksheets.push(build_worksheet(name, columns, &dictionary)?);
            }
        }

        Ok(Workbook {
            worksheets,
            dictionary,
        })
    }
}

/// Split the bootstrap body into its info and data documents.
fn split_bootstrap(raw: &str) -> Result<(Value, Value), DecodeError> {
    if let Some(parsed) = split_by_length(raw) {
        return Ok(parsed);
    }

    let pattern = regex::Regex::new(r"(?s)\d+;(\{.*\})\d+;(\{.*\})")
        .map_err(|e| DecodeError::Framing(e.to_string()))?;
    let captures = pattern
        .captures(raw)
        .ok_or_else(|| DecodeError::Framing("no length-prefixed documents".to_string()))?;
    let info = serde_json::from_str(&captures[1])?;
    let data = serde_json::from_str(&captures[2])?;
    Ok((info, data))
}

fn split_by_length(raw: &str) -> Option<(Value, Value)> {
    let (info, rest) = take_frame(raw.trim_start())?;
    let (data, _) = take_frame(rest)?;
    Some((serde_json::from_str(info).ok()?, serde_json::from_str(data).ok()?))
}

/// `<len>;<len chars>` → (frame, rest).
fn take_frame(input: &str) -> Option<(&str, &str)> {
    let (len, rest) = input.split_once(';')?;
    let len: usize = len.trim().parse().ok()?;
    let end = match rest.char_indices().nth(len) {
        Some((offset, _)) => offset,
        None if rest.chars().count() == len => rest.len(),
        None => return None,
    };
    Some((&rest[..end], &rest[end..]))
}

fn parse_segments(segments: &Value) -> Result<DataDictionary, DecodeError> {
    let segments = segments
        .as_object()
        .ok_or_else(|| DecodeError::Invalid("dataSegments is not an object".to_string()))?;

    let mut dictionary = DataDictionary::new();
    for (key, segment) in segments {
        let id: u64 = key
            .parse()
            .map_err(|_| DecodeError::Invalid(format!("segment id {key:?}")))?;
        let columns = segment
            .get("dataColumns")
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::MissingField(format!("dataSegments.{key}.dataColumns")))?;

        let columns = columns
            .iter()
            .map(|column| {
                Ok(DataColumn {
                    data_type: column
                        .get("dataType")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DecodeError::MissingField("dataColumns.dataType".to_string()))?
                        .to_string(),
                    values: column
                        .get("dataValues")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        dictionary.insert_segment(id, columns);
    }
    Ok(dictionary)
}

/// Zones in numeric id order.
fn ordered_zones(zones: &Map<String, Value>) -> Vec<&Value> {
    let mut ordered: Vec<(&String, &Value)> = zones.iter().collect();
    ordered.sort_by_key(|(key, _)| (key.parse::<u64>().unwrap_or(u64::MAX), (*key).clone()));
    ordered.into_iter().map(|(_, zone)| zone).collect()
}

fn index_list(value: &Value, field: &str) -> Result<Vec<i64>, DecodeError> {
    let Some(list) = value.get(field) else {
        return Ok(Vec::new());
    };
    list.as_array()
        .ok_or_else(|| DecodeError::Invalid(format!("{field} is not an array")))?
        .iter()
        .map(|i| {
            i.as_i64()
                .ok_or_else(|| DecodeError::Invalid(format!("{field} entry {i}")))
        })
        .collect()
}

fn first_index(column: &Value, field: &str) -> Result<usize, DecodeError> {
    column
        .get(field)
        .and_then(|v| v.get(0))
        .and_then(Value::as_u64)
        .map(|i| i as usize)
        .ok_or_else(|| DecodeError::MissingField(format!("vizDataColumns.{field}")))
}

fn lookup(values: &[&Value], index: usize, data_type: &str) -> Result<Value, DecodeError> {
    values
        .get(index)
        .map(|v| (*v).clone())
        .ok_or_else(|| DecodeError::Invalid(format!("{data_type} index {index} out of range")))
}

/// Materialize one worksheet's rows from its pane columns.
fn build_worksheet(
    name: &str,
    pane_columns: &Value,
    dictionary: &DataDictionary,
) -> Result<WorksheetData, DecodeError> {
    let panes = pane_columns
        .get("paneColumnsList")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MissingField(format!("{name}: paneColumnsList")))?;
    let viz_columns = pane_columns
        .get("vizDataColumns")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MissingField(format!("{name}: vizDataColumns")))?;
    let cstrings = dictionary.values("cstring");

    let mut columns: Vec<(String, Vec<Value>)> = Vec::new();
    let mut push = |id: String, cells: Vec<Value>| match columns.iter_mut().find(|(c, _)| *c == id) {
        Some(existing) => existing.1 = cells,
        None => columns.push((id, cells)),
    };

    for column in viz_columns {
        let Some(caption) = column
            .get("fieldCaption")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
        else {
            continue;
        };
        let data_type = column.get("dataType").and_then(Value::as_str).unwrap_or("");
        let pane = first_index(column, "paneIndices")?;
        let index = first_index(column, "columnIndices")?;
        let pane_column = panes
            .get(pane)
            .and_then(|p| p.get("vizPaneColumns"))
            .and_then(|c| c.get(index))
            .ok_or_else(|| {
                DecodeError::Invalid(format!("{name}: no pane column {pane}/{index} for {caption}"))
            })?;

        let values = dictionary.values(data_type);
        let value_indices = index_list(pane_column, "valueIndices")?;
        let alias_indices = index_list(pane_column, "aliasIndices")?;

        if !value_indices.is_empty() {
            let cells = value_indices
                .iter()
                .map(|&i| lookup(&values, i as usize, data_type))
                .collect::<Result<Vec<_>, _>>()?;
            push(format!("{caption}-value"), cells);
        }
        if !alias_indices.is_empty() {
            let cells = alias_indices
                .iter()
                .map(|&i| {
                    if i >= 0 {
                        lookup(&values, i as usize, data_type)
                    } else {
                        lookup(&cstrings, (i.unsigned_abs() - 1) as usize, "cstring")
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            push(format!("{caption}-alias"), cells);
        }
    }

    let height = columns.iter().map(|(_, cells)| cells.len()).max().unwrap_or(0);
    let rows = (0..height)
        .map(|i| {
            columns
                .iter()
                .map(|(id, cells)| (id.clone(), cells.get(i).cloned().unwrap_or(Value::Null)))
                .collect::<Row>()
        })
        .collect();

    Ok(WorksheetData {
        name: name.to_string(),
        columns: columns.into_iter().map(|(id, _)| id).collect(),
        rows,
    })
}
