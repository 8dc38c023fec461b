//! Batch loop over the persistence work queue.
//!
//! Units run strictly one after another on a single browser session. A unit
//! failure is recorded against the unit, and the session is discarded (after
//! a screenshot) and reopened lazily for the next unit. Driver and storage
//! failures abort the run.

use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::capture::{CacheScope, DebugCache, ResponseCollector};
use crate::config::{FallbackPolicy, HarvestConfig};
use crate::decoder::PayloadDecoder;
use crate::driver::SessionFactory;
use crate::error::{ErrorKind, HarvestResult};
use crate::navigation::Navigator;
use crate::persistence::{Persistence, WorkUnit};
use crate::types::{GeographyMode, ScrapeTarget};
use crate::variables::harvest_variables;

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    /// Unit attempts that failed.
    pub failed: usize,
    pub records: usize,
    /// Units that reached the retry bound without succeeding.
    pub exhausted: usize,
}

impl RunReport {
    /// No unit was left behind.
    pub fn is_clean(&self) -> bool {
        self.exhausted == 0
    }
}

/// Targets for one attempt at `unit`.
///
/// After `after_failures` fallback-eligible failures, every province of the
/// region is harvested on its own. Otherwise the region is harvested once,
/// filtered to its capital province.
pub fn plan_targets(unit: &WorkUnit, policy: &FallbackPolicy) -> Vec<ScrapeTarget> {
    let fallback = policy.enabled
        && unit.last_error_kind == Some(ErrorKind::NoWorksheetsAfterLoad)
        && unit.error_count >= policy.after_failures
        && !unit.region.provinces.is_empty();

    if fallback {
        return unit
            .region
            .provinces
            .iter()
            .map(|p| ScrapeTarget {
                screen: unit.screen,
                mode: GeographyMode::Province,
                geography: p.code.clone(),
                variable: None,
            })
            .collect();
    }

    let geography = unit
        .region
        .capital()
        .or_else(|| unit.region.provinces.first())
        .map(|p| p.code.clone())
        .unwrap_or_else(|| unit.region.code.clone());
    vec![ScrapeTarget {
        screen: unit.screen,
        mode: GeographyMode::Aggregate,
        geography,
        variable: None,
    }]
}

/// Drives queued units through a browser session.
pub struct Orchestrator<F, P> {
    factory: F,
    store: P,
    decoder: Box<dyn PayloadDecoder>,
    config: HarvestConfig,
    cache: Option<DebugCache>,
    variable: Option<String>,
    navigator: Option<Navigator>,
}

impl<F: SessionFactory, P: Persistence> Orchestrator<F, P> {
    pub fn new(factory: F, store: P, decoder: Box<dyn PayloadDecoder>, config: HarvestConfig) -> Self {
        Self {
            factory,
            store,
            decoder,
            config,
            cache: None,
            variable: None,
            navigator: None,
        }
    }

    /// Keep a copy of every captured payload.
    pub fn with_cache(mut self, cache: DebugCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Harvest only this variable of each unit.
    pub fn with_variable(mut self, variable: Option<String>) -> Self {
        self.variable = variable;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn into_store(self) -> P {
        self.store
    }

    /// Process units until the queue is empty.
    pub async fn run(&mut self) -> HarvestResult<RunReport> {
        let mut report = RunReport::default();
        let outcome = self.run_units(&mut report).await;

        if let Some(nav) = self.navigator.take() {
            if let Err(e) = nav.close().await {
                warn!("Failed to close browser session: {e}");
            }
        }
        outcome?;

        report.exhausted = self.store.count_exhausted(self.config.max_errors)?;
        info!(
            processed = report.processed,
            failed = report.failed,
            records = report.records,
            exhausted = report.exhausted,
            "Run finished"
        );
        Ok(report)
    }

    async fn run_units(&mut self, report: &mut RunReport) -> HarvestResult<()> {
        let mut first = true;
        while let Some(unit) = self.store.next_pending_unit(self.config.max_errors)? {
            if !first {
                sleep(self.config.unit_pause()).await;
            }
            first = false;

            info!(
                unit = unit.id,
                screen = %unit.screen,
                region = %unit.region.code,
                errors = unit.error_count,
                "Processing unit"
            );
            match self.process_unit(&unit).await {
                Ok(records) => {
                    self.store.mark_processed(&unit)?;
                    report.processed += 1;
                    report.records += records;
                    info!(unit = unit.id, records, "Unit processed");
                }
                Err(e) if e.is_unit_failure() => {
                    error!(unit = unit.id, kind = %e.kind(), "Unit failed: {e}");
                    self.store.mark_error(&unit, &e.to_string(), e.kind())?;
                    report.failed += 1;
                    self.discard_session(&unit).await;
                }
                Err(e) => {
                    error!(unit = unit.id, kind = %e.kind(), "Aborting run: {e}");
                    self.discard_session(&unit).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn open_session(&self) -> HarvestResult<Navigator> {
        let driver = self.factory.open().await?;
        info!("Browser session opened");
        Ok(Navigator::new(
            driver,
            ResponseCollector::new(self.cache.clone()),
            self.config.clone(),
        ))
    }

    async fn process_unit(&mut self, unit: &WorkUnit) -> HarvestResult<usize> {
        let mut records = 0;

        for mut target in plan_targets(unit, &self.config.fallback) {
            target.variable = self.variable.clone();
            let nav = match self.navigator.take() {
                Some(nav) => nav,
                None => self.open_session().await?,
            };
            let nav = self.navigator.insert(nav);

            nav.collector_mut().set_scope(Some(CacheScope {
                geography: unit.region.code.clone(),
                screen: target.screen,
                province: (target.mode == GeographyMode::Province).then(|| target.geography.clone()),
            }));
            info!(
                screen = %target.screen,
                mode = %target.mode,
                geography = %target.geography,
                "Harvesting target"
            );

            nav.switch_mode(target.mode).await?;
            nav.move_to_screen(target.screen).await?;
            nav.move_to_region(&target.geography).await?;
            let report = harvest_variables(
                nav,
                self.decoder.as_ref(),
                &mut self.store,
                &target,
                &unit.region.code,
            )
            .await?;
            records += report.records;
        }

        Ok(records)
    }

    /// Screenshot and close the current session, if any.
    async fn discard_session(&mut self, unit: &WorkUnit) {
        let Some(mut nav) = self.navigator.take() else {
            return;
        };
        let path = self.config.screenshot_dir.join(format!(
            "unit-{}-{}.png",
            unit.id,
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        match nav.screenshot(&path).await {
            Ok(()) => info!(path = %path.display(), "Saved failure screenshot"),
            Err(e) => warn!("Failed to save screenshot: {e}"),
        }
        if let Err(e) = nav.close().await {
            warn!("Failed to close browser session: {e}");
        }
    }
}
