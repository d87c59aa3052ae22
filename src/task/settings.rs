use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest decay window the remote service accepts
pub const MAX_DECAY: u32 = 512;

/// Asset class a simulation trades
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    Equity,
    Crypto,
}

/// Market region
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Amr,
    Asi,
    Chn,
    Eur,
    Glb,
    Hkg,
    Jpn,
    Kor,
    Twn,
    Usa,
}

/// Data delay in days
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Delay {
    Zero,
    One,
}

/// Language the job expression is written in
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Python,
    Expression,
    Fastexpr,
}

/// Stock selection universe
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Universe {
    #[serde(rename = "ILLIQUID_MINVOL1M")]
    IlliquidMinvol1m,
    #[serde(rename = "MINVOL1M")]
    Minvol1m,
    #[serde(rename = "TOP5")]
    Top5,
    #[serde(rename = "TOP10")]
    Top10,
    #[serde(rename = "TOP20")]
    Top20,
    #[serde(rename = "TOP50")]
    Top50,
    #[serde(rename = "TOP100")]
    Top100,
    #[serde(rename = "TOP200")]
    Top200,
    #[serde(rename = "TOP400")]
    Top400,
    #[serde(rename = "TOP500")]
    Top500,
    #[serde(rename = "TOP600")]
    Top600,
    #[serde(rename = "TOP800")]
    Top800,
    #[serde(rename = "TOP1000")]
    Top1000,
    #[serde(rename = "TOP1200")]
    Top1200,
    #[serde(rename = "TOP1600")]
    Top1600,
    #[serde(rename = "TOP2000U")]
    Top2000U,
    #[serde(rename = "TOP2500")]
    Top2500,
    #[serde(rename = "TOP3000")]
    Top3000,
    #[serde(rename = "TOPSP500")]
    TopSp500,
}

/// Neutralization applied to the simulated portfolio
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Neutralization {
    None,
    Market,
    Industry,
    Subindustry,
    Sector,
    Country,
    Statistical,
    Crowding,
    Fast,
    Slow,
    SlowAndFast,
}

const NEUTRALIZATION_BASIC: &[Neutralization] = &[
    Neutralization::None,
    Neutralization::Market,
    Neutralization::Industry,
    Neutralization::Subindustry,
    Neutralization::Sector,
];

const NEUTRALIZATION_EXTENDED: &[Neutralization] = &[
    Neutralization::None,
    Neutralization::Market,
    Neutralization::Industry,
    Neutralization::Subindustry,
    Neutralization::Sector,
    Neutralization::Country,
    Neutralization::Statistical,
    Neutralization::Crowding,
    Neutralization::Fast,
    Neutralization::Slow,
    Neutralization::SlowAndFast,
];

const NEUTRALIZATION_CRYPTO: &[Neutralization] = &[Neutralization::None, Neutralization::Market];

/// Validation failures for simulation settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("region {region} is not available for {instrument_type}")]
    UnsupportedRegion {
        instrument_type: InstrumentType,
        region: Region,
    },
    #[error("universe {universe} is not available in {region} for {instrument_type}")]
    UnsupportedUniverse {
        instrument_type: InstrumentType,
        region: Region,
        universe: Universe,
    },
    #[error("delay {delay} is not available in {region}")]
    UnsupportedDelay { region: Region, delay: Delay },
    #[error("neutralization {neutralization} is not available for {instrument_type} in {region}")]
    UnsupportedNeutralization {
        instrument_type: InstrumentType,
        region: Region,
        neutralization: Neutralization,
    },
    #[error("decay must be within 0..={max}, got {value}")]
    DecayOutOfRange { value: u32, max: u32 },
    #[error("truncation must be within 0.0..=1.0, got {0}")]
    TruncationOutOfRange(f64),
    #[error("invalid delay value: {0}")]
    InvalidDelay(u8),
}

/// Typed simulation configuration submitted alongside the job expression
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SimulationSettings {
    pub instrument_type: InstrumentType,
    pub region: Region,
    pub universe: Universe,
    pub delay: Delay,
    #[serde(default = "default_language")]
    pub language: Language,
    #[serde(default)]
    pub decay: u32,
    #[serde(default = "default_neutralization")]
    pub neutralization: Neutralization,
    #[serde(default = "default_truncation")]
    pub truncation: f64,
    #[serde(default = "default_true")]
    pub pasteurization: bool,
    #[serde(default = "default_unit_handling")]
    pub unit_handling: String,
    #[serde(default)]
    pub nan_handling: bool,
    #[serde(default)]
    pub max_trade: bool,
    #[serde(default)]
    pub visualization: bool,
    #[serde(default)]
    pub test_period: Option<String>,
}

fn default_language() -> Language {
    Language::Fastexpr
}

fn default_neutralization() -> Neutralization {
    Neutralization::Market
}

fn default_truncation() -> f64 {
    0.08
}

fn default_true() -> bool {
    true
}

fn default_unit_handling() -> String {
    "VERIFY".to_string()
}

impl SimulationSettings {
    /// Create settings with platform defaults for everything but the market selection
    pub fn new(
        instrument_type: InstrumentType,
        region: Region,
        universe: Universe,
        delay: Delay,
    ) -> Self {
        Self {
            instrument_type,
            region,
            universe,
            delay,
            language: default_language(),
            decay: 0,
            neutralization: default_neutralization(),
            truncation: default_truncation(),
            pasteurization: true,
            unit_handling: default_unit_handling(),
            nan_handling: false,
            max_trade: false,
            visualization: false,
            test_period: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_decay(mut self, decay: u32) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_neutralization(mut self, neutralization: Neutralization) -> Self {
        self.neutralization = neutralization;
        self
    }

    pub fn with_truncation(mut self, truncation: f64) -> Self {
        self.truncation = truncation;
        self
    }

    /// Key that decides which tasks may share one multi-job submission
    pub fn settings_group_key(&self) -> String {
        settings_group_key(self.region, self.delay, self.language, self.instrument_type)
    }

    /// Check every field against what the remote service offers for this market
    pub fn validate(&self) -> Result<(), SettingsError> {
        let universes = supported_universes(self.instrument_type, self.region);
        if universes.is_empty() {
            return Err(SettingsError::UnsupportedRegion {
                instrument_type: self.instrument_type,
                region: self.region,
            });
        }

        if !universes.contains(&self.universe) {
            return Err(SettingsError::UnsupportedUniverse {
                instrument_type: self.instrument_type,
                region: self.region,
                universe: self.universe,
            });
        }

        if !self.region.supported_delays().contains(&self.delay) {
            return Err(SettingsError::UnsupportedDelay {
                region: self.region,
                delay: self.delay,
            });
        }

        if !supported_neutralizations(self.instrument_type, self.region)
            .contains(&self.neutralization)
        {
            return Err(SettingsError::UnsupportedNeutralization {
                instrument_type: self.instrument_type,
                region: self.region,
                neutralization: self.neutralization,
            });
        }

        if self.decay > MAX_DECAY {
            return Err(SettingsError::DecayOutOfRange {
                value: self.decay,
                max: MAX_DECAY,
            });
        }

        if !(0.0..=1.0).contains(&self.truncation) {
            return Err(SettingsError::TruncationOutOfRange(self.truncation));
        }

        Ok(())
    }
}

/// Group key as a pure function of the four fields the remote API batches on
pub fn settings_group_key(
    region: Region,
    delay: Delay,
    language: Language,
    instrument_type: InstrumentType,
) -> String {
    format!(
        "{}_{}_{}_{}",
        region.as_str(),
        delay.value(),
        language.as_str(),
        instrument_type.as_str()
    )
}

/// Universes offered for an instrument type in a region; empty when the region is unsupported
pub fn supported_universes(instrument_type: InstrumentType, region: Region) -> &'static [Universe] {
    use Universe::*;

    match (instrument_type, region) {
        (InstrumentType::Crypto, Region::Glb) => &[Top50, Top20, Top10, Top5],
        (InstrumentType::Crypto, _) => &[],
        (InstrumentType::Equity, Region::Usa) => {
            &[Top3000, Top1000, Top500, Top200, IlliquidMinvol1m, TopSp500]
        }
        (InstrumentType::Equity, Region::Glb) => &[Top3000, Minvol1m],
        (InstrumentType::Equity, Region::Eur) => {
            &[Top2500, Top1200, Top800, Top400, IlliquidMinvol1m]
        }
        (InstrumentType::Equity, Region::Asi) => &[Minvol1m, IlliquidMinvol1m],
        (InstrumentType::Equity, Region::Chn) => &[Top2000U],
        (InstrumentType::Equity, Region::Kor) => &[Top600],
        (InstrumentType::Equity, Region::Twn) => &[Top500, Top100],
        (InstrumentType::Equity, Region::Hkg) => &[Top800, Top500],
        (InstrumentType::Equity, Region::Jpn) => &[Top1600, Top1200],
        (InstrumentType::Equity, Region::Amr) => &[Top600],
    }
}

/// Neutralizations accepted for an instrument type in a region
pub fn supported_neutralizations(
    instrument_type: InstrumentType,
    region: Region,
) -> &'static [Neutralization] {
    match (instrument_type, region) {
        (InstrumentType::Crypto, _) => NEUTRALIZATION_CRYPTO,
        (_, Region::Chn | Region::Kor | Region::Twn | Region::Hkg | Region::Jpn) => {
            NEUTRALIZATION_BASIC
        }
        _ => NEUTRALIZATION_EXTENDED,
    }
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Amr => "AMR",
            Region::Asi => "ASI",
            Region::Chn => "CHN",
            Region::Eur => "EUR",
            Region::Glb => "GLB",
            Region::Hkg => "HKG",
            Region::Jpn => "JPN",
            Region::Kor => "KOR",
            Region::Twn => "TWN",
            Region::Usa => "USA",
        }
    }

    /// Delays the region publishes data for
    pub fn supported_delays(&self) -> &'static [Delay] {
        match self {
            Region::Usa | Region::Eur | Region::Chn | Region::Amr => &[Delay::Zero, Delay::One],
            _ => &[Delay::One],
        }
    }
}

impl Delay {
    pub fn value(&self) -> u8 {
        match self {
            Delay::Zero => 0,
            Delay::One => 1,
        }
    }
}

impl TryFrom<u8> for Delay {
    type Error = SettingsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Delay::Zero),
            1 => Ok(Delay::One),
            other => Err(SettingsError::InvalidDelay(other)),
        }
    }
}

impl From<Delay> for u8 {
    fn from(delay: Delay) -> Self {
        delay.value()
    }
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "PYTHON",
            Language::Expression => "EXPRESSION",
            Language::Fastexpr => "FASTEXPR",
        }
    }
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Equity => "EQUITY",
            InstrumentType::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Universe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Universe::IlliquidMinvol1m => "ILLIQUID_MINVOL1M",
            Universe::Minvol1m => "MINVOL1M",
            Universe::Top5 => "TOP5",
            Universe::Top10 => "TOP10",
            Universe::Top20 => "TOP20",
            Universe::Top50 => "TOP50",
            Universe::Top100 => "TOP100",
            Universe::Top200 => "TOP200",
            Universe::Top400 => "TOP400",
            Universe::Top500 => "TOP500",
            Universe::Top600 => "TOP600",
            Universe::Top800 => "TOP800",
            Universe::Top1000 => "TOP1000",
            Universe::Top1200 => "TOP1200",
            Universe::Top1600 => "TOP1600",
            Universe::Top2000U => "TOP2000U",
            Universe::Top2500 => "TOP2500",
            Universe::Top3000 => "TOP3000",
            Universe::TopSp500 => "TOPSP500",
        }
    }
}

impl fmt::Display for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Neutralization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Neutralization::None => "NONE",
            Neutralization::Market => "MARKET",
            Neutralization::Industry => "INDUSTRY",
            Neutralization::Subindustry => "SUBINDUSTRY",
            Neutralization::Sector => "SECTOR",
            Neutralization::Country => "COUNTRY",
            Neutralization::Statistical => "STATISTICAL",
            Neutralization::Crowding => "CROWDING",
            Neutralization::Fast => "FAST",
            Neutralization::Slow => "SLOW",
            Neutralization::SlowAndFast => "SLOW_AND_FAST",
        }
    }
}

impl fmt::Display for Neutralization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
