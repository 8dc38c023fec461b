//! Core identifiers and records shared by every harvesting stage.
//!
//! The workbook exposes closed sets of tabs, screens and network call kinds.
//! Each set is an exhaustive enum with a fallible text lookup so that no raw
//! label comparison leaks into navigation or extraction logic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of intercepted network call, derived from the request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Initial full-state response of a visualization session.
    Bootstrap,
    /// Emitted after the client finished its first render.
    FirstRender,
    /// Response to a parameter (variable) change.
    ParameterSet,
    /// Response to a sheet/tab layout change.
    LayoutChange,
    /// Response to a categorical (geography) filter change.
    CategoricalFilter,
}

/// URL substring → classification. First match wins.
pub const URL_PATTERNS: [(&str, Classification); 5] = [
    ("bootstrapSession/sessions/", Classification::Bootstrap),
    ("/notify-first-client-render-occurred", Classification::FirstRender),
    ("/set-parameter-value-from-index", Classification::ParameterSet),
    ("/ensure-layout-for-sheet", Classification::LayoutChange),
    ("/categorical-filter-by-index", Classification::CategoricalFilter),
];

impl Classification {
    /// All classifications, in pattern-table order.
    pub const ALL: [Classification; 5] = [
        Classification::Bootstrap,
        Classification::FirstRender,
        Classification::ParameterSet,
        Classification::LayoutChange,
        Classification::CategoricalFilter,
    ];

    /// Stable tag used by the in-page probe and in cache file names.
    pub fn tag(self) -> &'static str {
        match self {
            Classification::Bootstrap => "bootstrap",
            Classification::FirstRender => "first_render",
            Classification::ParameterSet => "parameter_set",
            Classification::LayoutChange => "layout_change",
            Classification::CategoricalFilter => "categorical_filter",
        }
    }

    /// Parse a probe tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag.trim())
    }

    /// Classify a request URL against the fixed pattern table.
    pub fn from_url(url: &str) -> Option<Self> {
        URL_PATTERNS
            .iter()
            .find(|(pattern, _)| url.contains(pattern))
            .map(|(_, class)| *class)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Geographic granularity the workbook is filtered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyMode {
    /// Autonomous-community dashboards (`*_CCAA` tabs).
    Aggregate,
    /// Province dashboards (`*_Provincial` tabs).
    Province,
}

impl GeographyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GeographyMode::Aggregate => "aggregate",
            GeographyMode::Province => "province",
        }
    }
}

impl fmt::Display for GeographyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns of a screen's map worksheet that carry the harvested data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Column holding the variable's value.
    pub label: &'static str,
    /// Column holding the municipality name.
    pub municipality: &'static str,
    /// Fallback municipality column, used when the primary cell is empty.
    pub secondary_municipality: Option<&'static str>,
}

const MUNICIPALITY_COLUMN: &str = "cc_Municpio_name_after_set-alias";
const SECONDARY_MUNICIPALITY_COLUMN: &str = "ATTR(cc_label_provincia_muncipio_map_ccaa)-alias";

/// One of the six thematic dashboard panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Screen {
    Demografia,
    MedioFisico,
    Economia,
    Servicios,
    Vivienda,
    Medioambiente,
}

impl Screen {
    pub const ALL: [Screen; 6] = [
        Screen::Demografia,
        Screen::MedioFisico,
        Screen::Economia,
        Screen::Servicios,
        Screen::Vivienda,
        Screen::Medioambiente,
    ];

    /// Display name, as stored in the work queue.
    pub fn name(self) -> &'static str {
        match self {
            Screen::Demografia => "Demografía",
            Screen::MedioFisico => "Medio Físico",
            Screen::Economia => "Economía",
            Screen::Servicios => "Servicios",
            Screen::Vivienda => "Vivienda",
            Screen::Medioambiente => "Medioambiente",
        }
    }

    /// ASCII slug used in file names.
    pub fn slug(self) -> &'static str {
        match self {
            Screen::Demografia => "demografia",
            Screen::MedioFisico => "medio-fisico",
            Screen::Economia => "economia",
            Screen::Servicios => "servicios",
            Screen::Vivienda => "vivienda",
            Screen::Medioambiente => "medioambiente",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name.trim())
    }

    /// Block prefix shared by the screen's tabs and sheets (`B1`..`B6`).
    fn block(self) -> &'static str {
        match self {
            Screen::Demografia => "B1",
            Screen::MedioFisico => "B2",
            Screen::Economia => "B3",
            Screen::Servicios => "B4",
            Screen::Vivienda => "B5",
            Screen::Medioambiente => "B6",
        }
    }

    /// Tab that shows this screen in the given geography mode.
    pub fn tab(self, mode: GeographyMode) -> Tab {
        match (self, mode) {
            (Screen::Demografia, GeographyMode::Aggregate) => Tab::B1DemograficoCcaa,
            (Screen::MedioFisico, GeographyMode::Aggregate) => Tab::B2GeograficoCcaa,
            (Screen::Economia, GeographyMode::Aggregate) => Tab::B3EconomicoCcaa,
            (Screen::Servicios, GeographyMode::Aggregate) => Tab::B4ServiciosCcaa,
            (Screen::Vivienda, GeographyMode::Aggregate) => Tab::B5ViviendaCcaa,
            (Screen::Medioambiente, GeographyMode::Aggregate) => Tab::B6MedioambientalCcaa,
            (Screen::Demografia, GeographyMode::Province) => Tab::B1DemograficoProvincial,
            (Screen::MedioFisico, GeographyMode::Province) => Tab::B2GeograficoProvincial,
            (Screen::Economia, GeographyMode::Province) => Tab::B3EconomicoProvincial,
            (Screen::Servicios, GeographyMode::Province) => Tab::B4ServiciosProvincial,
            (Screen::Vivienda, GeographyMode::Province) => Tab::B5ViviendaProvincial,
            (Screen::Medioambiente, GeographyMode::Province) => Tab::B6MedioambientalProvincial,
        }
    }

    /// Name of the worksheet holding every variable of the screen's map.
    pub fn sheet_name(self, mode: GeographyMode) -> String {
        let scope = match mode {
            GeographyMode::Aggregate => "ccaa",
            GeographyMode::Province => "provincia",
        };
        format!("{}_mapa_{scope}_todas_variables", self.block())
    }

    pub fn columns(self) -> ColumnMapping {
        let label = match self {
            Screen::Demografia => "MIN(cp_label_sheet_municipio_provincia)-alias",
            Screen::MedioFisico => "MIN(cp_B2_label_sheet_municpio_provincia)-alias",
            Screen::Economia => "MIN(cp_B3_label_sheet_municpio_provincia)-alias",
            Screen::Servicios => "MIN(cp_B4_label_sheet_municpio_provincia)-alias",
            Screen::Vivienda => "MIN(cp_B5_label_sheet_municpio_provincia)-alias",
            Screen::Medioambiente => "MIN(cp_B6_label_sheet_municpio_provincia)-alias",
        };
        ColumnMapping {
            label,
            municipality: MUNICIPALITY_COLUMN,
            secondary_municipality: Some(SECONDARY_MUNICIPALITY_COLUMN),
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every tab label the workbook shows in its tab strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tab {
    Portada,
    Busqueda,
    B1Demografico,
    B1Demografico2,
    B1DemograficoProvincial,
    B1DemograficoCcaa,
    B1DemograficoNacional,
    B2Geografico,
    B2GeograficoProvincial,
    B2GeograficoCcaa,
    B2GeograficoNacional,
    B3Economico,
    B3EconomicoProvincial,
    B3EconomicoCcaa,
    B3EconomicoNacional,
    B4Servicios,
    B4Servicios2,
    B4ServiciosProvincial,
    B4ServiciosCcaa,
    B4ServiciosNacional,
    B5Vivienda,
    B5ViviendaProvincial,
    B5ViviendaCcaa,
    B5ViviendaNacional,
    B6Medioambiental,
    B6MedioambientalProvincial,
    B6MedioambientalCcaa,
    B6MedioambientalNacional,
}

impl Tab {
    pub const ALL: [Tab; 28] = [
        Tab::Portada,
        Tab::Busqueda,
        Tab::B1Demografico,
        Tab::B1Demografico2,
        Tab::B1DemograficoProvincial,
        Tab::B1DemograficoCcaa,
        Tab::B1DemograficoNacional,
        Tab::B2Geografico,
        Tab::B2GeograficoProvincial,
        Tab::B2GeograficoCcaa,
        Tab::B2GeograficoNacional,
        Tab::B3Economico,
        Tab::B3EconomicoProvincial,
        Tab::B3EconomicoCcaa,
        Tab::B3EconomicoNacional,
        Tab::B4Servicios,
        Tab::B4Servicios2,
        Tab::B4ServiciosProvincial,
        Tab::B4ServiciosCcaa,
        Tab::B4ServiciosNacional,
        Tab::B5Vivienda,
        Tab::B5ViviendaProvincial,
        Tab::B5ViviendaCcaa,
        Tab::B5ViviendaNacional,
        Tab::B6Medioambiental,
        Tab::B6MedioambientalProvincial,
        Tab::B6MedioambientalCcaa,
        Tab::B6MedioambientalNacional,
    ];

    /// Visible tab text.
    pub fn label(self) -> &'static str {
        match self {
            Tab::Portada => "Portada",
            Tab::Busqueda => "Búsqueda personalizada",
            Tab::B1Demografico => "B1_Demográfico",
            Tab::B1Demografico2 => "B1_Demográfico_2",
            Tab::B1DemograficoProvincial => "B1_Demográfico_Provincial",
            Tab::B1DemograficoCcaa => "B1_Demográfico_CCAA",
            Tab::B1DemograficoNacional => "B1_Demográfico_Nacional",
            Tab::B2Geografico => "B2_Geográfico",
            Tab::B2GeograficoProvincial => "B2_Geográfico_Provincial",
            Tab::B2GeograficoCcaa => "B2_Geográfico_CCAA",
            Tab::B2GeograficoNacional => "B2_Geográfico_Nacional",
            Tab::B3Economico => "B3_Económico",
            Tab::B3EconomicoProvincial => "B3_Económico_Provincial",
            Tab::B3EconomicoCcaa => "B3_Económico_CCAA",
            Tab::B3EconomicoNacional => "B3_Económico_Nacional",
            Tab::B4Servicios => "B4_Servicios",
            Tab::B4Servicios2 => "B4_Servicios_2",
            Tab::B4ServiciosProvincial => "B4_Servicios_Provincial",
            Tab::B4ServiciosCcaa => "B4_Servicios_CCAA",
            Tab::B4ServiciosNacional => "B4_Servicios_Nacional",
            Tab::B5Vivienda => "B5_Vivienda",
            Tab::B5ViviendaProvincial => "B5_Vivienda_Provincial",
            Tab::B5ViviendaCcaa => "B5_Vivienda_CCAA",
            Tab::B5ViviendaNacional => "B5_Vivienda_Nacional",
            Tab::B6Medioambiental => "B6_MedioAmbiental",
            Tab::B6MedioambientalProvincial => "B6_Medioambiental_Provincial",
            Tab::B6MedioambientalCcaa => "B6_Medioambiental_CCAA",
            Tab::B6MedioambientalNacional => "B6_Medioambiental_Nacional",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|t| t.label() == label)
    }

    /// The harvestable screen this tab shows, with its geography mode.
    pub fn screen(self) -> Option<(Screen, GeographyMode)> {
        Screen::ALL.into_iter().find_map(|screen| {
            [GeographyMode::Aggregate, GeographyMode::Province]
                .into_iter()
                .find(|mode| screen.tab(*mode) == self)
                .map(|mode| (screen, mode))
        })
    }
}

/// A province of an autonomous community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    /// Two-digit INE province code.
    pub code: String,
    pub name: String,
    /// Whether the community's capital lies in this province.
    #[serde(default)]
    pub is_capital: bool,
}

/// An autonomous community (the aggregate geography).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Two-digit INE community code.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub provinces: Vec<Province>,
}

impl Region {
    pub fn capital(&self) -> Option<&Province> {
        self.provinces.iter().find(|p| p.is_capital)
    }
}

/// What to navigate to before harvesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub screen: Screen,
    pub mode: GeographyMode,
    /// Province code the categorical filter is moved to.
    pub geography: String,
    /// Restrict the harvest to one variable; `None` walks all of them.
    pub variable: Option<String>,
}

/// One harvested value, handed to persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub screen: Screen,
    /// Community code the unit belongs to.
    pub region: String,
    pub municipality: String,
    pub variable: String,
    pub value: Option<String>,
}
