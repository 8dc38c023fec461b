//! Variable iteration: walk every entry of the parameter dropdown once,
//! reconcile the workbook after each selection and persist its rows.

use serde_json::Value;
use tracing::{info, warn};

use crate::decoder::{PayloadDecoder, Row, Workbook};
use crate::error::{HarvestError, HarvestResult};
use crate::navigation::Navigator;
use crate::persistence::Persistence;
use crate::text::fix_mojibake;
use crate::types::{ExtractedRecord, ScrapeTarget};

/// Outcome of one target's variable walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableReport {
    /// Variables in the order they were harvested.
    pub variables: Vec<String>,
    pub records: usize,
}

/// Harvest every variable of `target` on the already positioned page.
///
/// `region` is the community code stored with each record.
pub async fn harvest_variables(
    nav: &mut Navigator,
    decoder: &dyn PayloadDecoder,
    store: &mut dyn Persistence,
    target: &ScrapeTarget,
    region: &str,
) -> HarvestResult<VariableReport> {
    let sheet_name = target.screen.sheet_name(target.mode);
    let mut pending = nav.read_variables().await?;

    if let Some(only) = &target.variable {
        if !pending.contains(only) {
            return Err(HarvestError::VariableNotFound(only.clone()));
        }
        pending = vec![only.clone()];
        if nav.current_variable().await? != *only {
            nav.select_variable(only).await?;
        }
    }

    if pending.is_empty() {
        return Err(HarvestError::NoVariableProcessed(sheet_name));
    }

    let mut report = VariableReport::default();
    loop {
        let current = nav.current_variable().await?;
        let Some(position) = pending.iter().position(|v| *v == current) else {
            return Err(HarvestError::VariableNotInList(current));
        };

        let workbook = nav.collector_mut().reconcile(decoder)?;
        let records = extract(workbook, target, region, &current)?;
        for record in &records {
            store.upsert(record)?;
        }
        info!(
            variable = %current,
            records = records.len(),
            remaining = pending.len() - 1,
            "Variable harvested"
        );
        report.records += records.len();
        report.variables.push(pending.remove(position));

        let Some(next) = pending.first().cloned() else {
            break;
        };
        nav.select_variable(&next).await?;
    }

    Ok(report)
}

/// Rows of the target's sheet as records for `variable`.
pub fn extract(
    workbook: &Workbook,
    target: &ScrapeTarget,
    region: &str,
    variable: &str,
) -> HarvestResult<Vec<ExtractedRecord>> {
    let sheet_name = target.screen.sheet_name(target.mode);
    if workbook.is_empty() {
        return Err(HarvestError::NoWorksheetsAfterLoad(sheet_name));
    }
    let Some(sheet) = workbook.worksheet(&sheet_name) else {
        return Err(HarvestError::NoWorksheetsAfterLoad(format!(
            "worksheet {sheet_name} not in the reconciled model"
        )));
    };
    if sheet.columns.is_empty() {
        return Err(HarvestError::NoWorksheetsAfterLoad(format!(
            "worksheet {sheet_name} has no columns"
        )));
    }

    let mapping = target.screen.columns();
    let mut records = Vec::with_capacity(sheet.rows.len());
    for row in &sheet.rows {
        let municipality = non_empty_text(row, mapping.municipality).or_else(|| {
            mapping
                .secondary_municipality
                .and_then(|column| non_empty_text(row, column))
        });
        let Some(municipality) = municipality else {
            warn!(sheet = %sheet_name, "Skipping row without municipality");
            continue;
        };

        records.push(ExtractedRecord {
            screen: target.screen,
            region: region.to_string(),
            municipality: fix_mojibake(&municipality),
            variable: variable.to_string(),
            value: row.get(mapping.label).and_then(cell_text),
        });
    }
    Ok(records)
}

fn non_empty_text(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .and_then(cell_text)
        .filter(|text| !text.trim().is_empty())
}

/// Text of a cell; null is no value.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ResponseCollector;
    use crate::config::HarvestConfig;
    use crate::decoder::WorksheetData;
    use crate::error::ErrorKind;
    use crate::persistence::MemoryStore;
    use crate::test_support::{payload, sheet, CountingDecoder, FakeDecoder, FakeViz, VizView};
    use crate::types::{Classification, GeographyMode, Screen};
    use serde_json::json;
    use std::sync::Arc;

    fn target(screen: Screen) -> ScrapeTarget {
        ScrapeTarget {
            screen,
            mode: GeographyMode::Aggregate,
            geography: "01".into(),
            variable: None,
        }
    }

    async fn positioned(viz: FakeViz, screen: Screen) -> Navigator {
        let mut nav = Navigator::new(Box::new(viz), ResponseCollector::new(None), HarvestConfig::default());
        nav.switch_mode(GeographyMode::Aggregate).await.unwrap();
        nav.move_to_screen(screen).await.unwrap();
        nav
    }

    fn row(cells: &[(&str, Value)]) -> Row {
        cells
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    fn workbook(sheets: Vec<WorksheetData>) -> Workbook {
        Workbook {
            worksheets: sheets,
            ..Workbook::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_variable_harvested_once() {
        let mut nav = positioned(FakeViz::new(), Screen::Economia).await;
        let mut store = MemoryStore::new();

        let report = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target(Screen::Economia), "16")
            .await
            .unwrap();

        assert_eq!(report.variables, vec!["Población", "Densidad", "Edad media"]);
        assert_eq!(report.records, 3);
        assert_eq!(store.record_count(), 3);
        assert_eq!(
            store.value(Screen::Economia, "16", "01001", "Densidad"),
            Some(Some("Densidad@01"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restricted_to_one_variable() {
        let mut nav = positioned(FakeViz::new(), Screen::Demografia).await;
        let mut store = MemoryStore::new();
        let mut target = target(Screen::Demografia);
        target.variable = Some("Edad media".into());

        let report = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target, "16")
            .await
            .unwrap();
        assert_eq!(report.variables, vec!["Edad media"]);
        assert_eq!(
            store.value(Screen::Demografia, "16", "01001", "Edad media"),
            Some(Some("Edad media@01"))
        );

        target.variable = Some("Renta".into());
        let err = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target, "16")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VariableNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_dropdown_processes_nothing() {
        let mut nav = positioned(FakeViz::with_variables(&[]), Screen::Demografia).await;
        let mut store = MemoryStore::new();

        let err = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target(Screen::Demografia), "16")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoVariableProcessed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_outside_list_fails() {
        let mut viz = FakeViz::with_variables(&["Densidad", "Paro"]);
        viz.initial_variable = Some("Oculta".into());
        let mut nav = positioned(viz, Screen::Demografia).await;
        let mut store = MemoryStore::new();

        let err = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target(Screen::Demografia), "16")
            .await
            .unwrap_err();
        match err {
            HarvestError::VariableNotInList(name) => assert_eq!(name, "Oculta"),
            other => panic!("expected VariableNotInList, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sheet_is_no_worksheets_after_load() {
        let mut viz = FakeViz::new();
        viz.set_render(Arc::new(|_: &VizView, _: Classification| {
            Some(payload(&[sheet("Otra hoja", &["x"], &[])]))
        }));
        let mut nav = positioned(viz, Screen::Demografia).await;
        let mut store = MemoryStore::new();

        let err = harvest_variables(&mut nav, &FakeDecoder, &mut store, &target(Screen::Demografia), "16")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWorksheetsAfterLoad);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decoder_work_per_region_stays_flat() {
        let mut nav = positioned(FakeViz::new(), Screen::Economia).await;
        let mut store = MemoryStore::new();
        let decoder = CountingDecoder::default();

        let mut per_region = Vec::new();
        for code in ["11", "12", "13", "14", "15", "16"] {
            let before = decoder.updates();
            let mut target = target(Screen::Economia);
            target.geography = code.into();
            nav.move_to_region(code).await.unwrap();
            harvest_variables(&mut nav, &decoder, &mut store, &target, code)
                .await
                .unwrap();
            per_region.push(decoder.updates() - before);
        }

        // Layout change, first render and region filter, then two selections.
        assert_eq!(per_region[0], 5);
        // Region filter plus one update per newly selected variable.
        assert!(per_region[1..].iter().all(|&n| n == 3), "{per_region:?}");
        assert_eq!(decoder.decodes(), 1);
        assert_eq!(
            store.value(Screen::Economia, "16", "16001", "Densidad"),
            Some(Some("Densidad@16"))
        );
    }

    #[test]
    fn test_extract_prefers_primary_then_secondary_column() {
        let columns = Screen::Vivienda.columns();
        let secondary = columns.secondary_municipality.unwrap();
        let sheet_name = Screen::Vivienda.sheet_name(GeographyMode::Aggregate);
        let mut data = sheet(&sheet_name, &[columns.label, columns.municipality, secondary], &[]);
        data.rows = vec![
            row(&[(columns.label, json!(12.5)), (columns.municipality, json!("CÃ¡diz"))]),
            row(&[
                (columns.label, json!(null)),
                (columns.municipality, json!("")),
                (secondary, json!("Teruel")),
            ]),
            row(&[(columns.label, json!(3))]),
        ];

        let records = extract(&workbook(vec![data]), &target(Screen::Vivienda), "02", "Viviendas").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].municipality, "Cádiz");
        assert_eq!(records[0].value.as_deref(), Some("12.5"));
        assert_eq!(records[1].municipality, "Teruel");
        assert_eq!(records[1].value, None);
    }

    #[test]
    fn test_extract_missing_sheet_cases() {
        let t = target(Screen::Servicios);
        let err = extract(&workbook(vec![]), &t, "01", "v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWorksheetsAfterLoad);

        let err = extract(&workbook(vec![sheet("other", &["a"], &[])]), &t, "01", "v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWorksheetsAfterLoad);

        let name = Screen::Servicios.sheet_name(GeographyMode::Aggregate);
        let err = extract(&workbook(vec![sheet(&name, &[], &[])]), &t, "01", "v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWorksheetsAfterLoad);
    }
}
