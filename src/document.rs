//! Synthetic telemetry documents.
//!
//! Every [`Document`] describes a single measurement reported by a vehicle.
//! The schema is fixed: each field is drawn independently from the generator
//! declared for it below, and [`Document::validate`] checks the generated
//! values against the same declarations.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{AsRefStr, EnumIter};

use crate::RngGen;

/// A uniformly distributed integer field.
#[derive(Clone, Copy, Debug)]
pub struct IntField {
    pub name: &'static str,
    pub min: i64,
    pub max: i64,
}

impl IntField {
    const fn new(name: &'static str, min: i64, max: i64) -> Self {
        Self { name, min, max }
    }

    fn sample(&self, rng: &mut RngGen) -> i64 {
        rng.gen_range(self.min..=self.max)
    }

    fn check(&self, value: i64) -> Result<()> {
        anyhow::ensure!(
            (self.min..=self.max).contains(&value),
            "{} = {} is out of range [{}, {}]",
            self.name,
            value,
            self.min,
            self.max,
        );
        Ok(())
    }
}

/// A uniformly distributed number with a fixed count of decimal places.
///
/// The value is drawn as a whole number of `10^-places` units,
/// so both the range and the precision hold exactly.
#[derive(Clone, Copy, Debug)]
pub struct FixedPointField {
    pub name: &'static str,
    pub min: i64,
    pub max: i64,
    pub places: u32,
}

impl FixedPointField {
    const fn new(name: &'static str, min: i64, max: i64, places: u32) -> Self {
        Self {
            name,
            min,
            max,
            places,
        }
    }

    fn unit(&self) -> i64 {
        10i64.pow(self.places)
    }

    fn sample_decimal(&self, rng: &mut RngGen) -> Decimal {
        let units = rng.gen_range(self.min * self.unit()..=self.max * self.unit());
        Decimal::new(units, self.places)
    }

    fn sample_float(&self, rng: &mut RngGen) -> f64 {
        self.sample_decimal(rng).to_f64()
    }

    fn check_float(&self, value: f64) -> Result<()> {
        anyhow::ensure!(
            value >= self.min as f64 && value <= self.max as f64,
            "{} = {} is out of range [{}, {}]",
            self.name,
            value,
            self.min,
            self.max,
        );
        Ok(())
    }

    fn check_decimal(&self, value: &Decimal) -> Result<()> {
        anyhow::ensure!(
            value.scale() == self.places,
            "{} = {} should have exactly {} decimal places",
            self.name,
            value,
            self.places,
        );
        let units = value.units();
        anyhow::ensure!(
            units >= self.min * self.unit() && units <= self.max * self.unit(),
            "{} = {} is out of range [{}, {}]",
            self.name,
            value,
            self.min,
            self.max,
        );
        Ok(())
    }
}

pub const VEHICLE_ID: IntField = IntField::new("vehicleid", 0, 99_999);
pub const TEMPERATURE: FixedPointField = FixedPointField::new("temperature", -20, 50, 1);
pub const OPERATING_TIME: IntField = IntField::new("operatingtime", 0, 100_000);
pub const FUEL_USAGE: FixedPointField = FixedPointField::new("fuelusage", 0, 50, 2);
pub const FRONT_LINKAGE_POSITION: IntField = IntField::new("front_linkage_position", 0, 360);
pub const DRIVING_SPEED: IntField = IntField::new("drivingspeed", 0, 80);
pub const ENGINE_STATE: IntField = IntField::new("enginestate", 0, 1);
pub const AUTOPILOT_SYSTEM_STATE: IntField = IntField::new("autopilot_system_state", 0, 1);
pub const ENGINE_LOAD: FixedPointField = FixedPointField::new("engine_load", 0, 100, 1);
pub const ALTITUDE: FixedPointField = FixedPointField::new("altitude", -414, 8849, 1);
pub const ENGINE_ROTATION: FixedPointField = FixedPointField::new("engine_rotation", 0, 3000, 2);
pub const FRONT_PME_SHAFT: FixedPointField = FixedPointField::new("front_pme_shaft", 0, 50, 2);
pub const REAR_LINKAGE_POSITION: IntField = IntField::new("rear_linkage_position", 0, 360);
pub const FUEL_TANK_LEVEL: IntField = IntField::new("fuel_tank_level", 0, 2000);
pub const ENGINE_TEMPERATURE: FixedPointField =
    FixedPointField::new("engine_temperature", -40, 300, 1);
pub const LTE_CONNECTION_LEVEL: FixedPointField =
    FixedPointField::new("lte_connection_level", 0, 100, 2);

/// A fixed-point decimal number, e.g. `12.30` is `units = 1230, scale = 2`.
///
/// Serialized as a string, so the number of decimal places survives
/// the round trip through the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    units: i64,
    scale: u32,
}

impl Decimal {
    /// The largest scale accepted when parsing, `10^18` still fits in `i64`.
    pub const MAX_SCALE: u32 = 18;

    pub fn new(units: i64, scale: u32) -> Self {
        Self { units, scale }
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn to_f64(&self) -> f64 {
        self.units as f64 / 10f64.powi(self.scale as i32)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }
        let sign = if self.units < 0 { "-" } else { "" };
        let scale = self.scale as usize;
        let digits = format!("{:0>width$}", self.units.unsigned_abs(), width = scale + 1);
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        anyhow::ensure!(
            frac_part.chars().all(|c| c.is_ascii_digit()),
            "Invalid decimal: {}",
            s
        );
        anyhow::ensure!(
            frac_part.len() <= Decimal::MAX_SCALE as usize,
            "Decimal {} has more than {} fractional digits",
            s,
            Decimal::MAX_SCALE,
        );
        let scale = frac_part.len() as u32;
        let units: i64 = format!("{int_part}{frac_part}").parse()?;
        Ok(Self::new(units, scale))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FourWheelDrivingState {
    Enabled,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Online,
    Offline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, AsRefStr)]
pub enum DrivingMode {
    #[serde(rename = "Light Speed")]
    #[strum(serialize = "Light Speed")]
    LightSpeed,
    #[serde(rename = "Ridiculous Speed")]
    #[strum(serialize = "Ridiculous Speed")]
    RidiculousSpeed,
    #[serde(rename = "Ludicrous Speed")]
    #[strum(serialize = "Ludicrous Speed")]
    LudicrousSpeed,
    #[serde(rename = "Plaid Speed")]
    #[strum(serialize = "Plaid Speed")]
    PlaidSpeed,
}

/// A geographic position, stored as `[latitude, longitude]` decimal strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position(pub String, pub String);

impl Position {
    pub fn latitude(&self) -> &str {
        &self.0
    }

    pub fn longitude(&self) -> &str {
        &self.1
    }
}

/// The pair of fields which identifies documents in point lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NameKey {
    pub first_name: String,
    pub last_name: String,
}

/// A single telemetry measurement.
///
/// There is no identity field - ids are assigned by the store on insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub ts: DateTime<Utc>,
    pub vehicleid: i64,
    pub first_name: String,
    pub last_name: String,
    pub temperature: f64,
    pub operatingtime: i64,
    pub fuelusage: Decimal,
    pub front_linkage_position: i64,
    pub drivingspeed: i64,
    pub enginestate: i64,
    pub autopilot_system_state: i64,
    pub engine_load: Decimal,
    pub position: Position,
    pub altitude: f64,
    pub engine_rotation: Decimal,
    pub front_pme_shaft: Decimal,
    pub rear_linkage_position: i64,
    pub four_wheel_driving_state: FourWheelDrivingState,
    pub fuel_tank_level: i64,
    pub last_error_msg: String,
    pub engine_temperature: f64,
    pub connection_state: ConnectionState,
    pub lte_connection_level: Decimal,
    pub mode: DrivingMode,
}

impl Document {
    pub fn name_key(&self) -> NameKey {
        NameKey {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }

    /// Checks that every field stays within its declared domain.
    pub fn validate(&self) -> Result<()> {
        VEHICLE_ID.check(self.vehicleid)?;
        OPERATING_TIME.check(self.operatingtime)?;
        FRONT_LINKAGE_POSITION.check(self.front_linkage_position)?;
        DRIVING_SPEED.check(self.drivingspeed)?;
        ENGINE_STATE.check(self.enginestate)?;
        AUTOPILOT_SYSTEM_STATE.check(self.autopilot_system_state)?;
        REAR_LINKAGE_POSITION.check(self.rear_linkage_position)?;
        FUEL_TANK_LEVEL.check(self.fuel_tank_level)?;

        TEMPERATURE.check_float(self.temperature)?;
        ALTITUDE.check_float(self.altitude)?;
        ENGINE_TEMPERATURE.check_float(self.engine_temperature)?;

        FUEL_USAGE.check_decimal(&self.fuelusage)?;
        ENGINE_LOAD.check_decimal(&self.engine_load)?;
        ENGINE_ROTATION.check_decimal(&self.engine_rotation)?;
        FRONT_PME_SHAFT.check_decimal(&self.front_pme_shaft)?;
        LTE_CONNECTION_LEVEL.check_decimal(&self.lte_connection_level)?;

        anyhow::ensure!(!self.first_name.is_empty(), "first_name is empty");
        anyhow::ensure!(!self.last_name.is_empty(), "last_name is empty");
        anyhow::ensure!(!self.last_error_msg.is_empty(), "last_error_msg is empty");

        let latitude: f64 = self.position.latitude().parse()?;
        let longitude: f64 = self.position.longitude().parse()?;
        anyhow::ensure!(
            (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude),
            "position {:?} is not a valid coordinate",
            self.position,
        );

        Ok(())
    }
}

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah",
    "Charles", "Karen", "Christopher", "Lisa", "Daniel", "Nancy", "Matthew", "Betty", "Anthony",
    "Margaret", "Mark", "Sandra", "Donald", "Ashley", "Steven", "Kimberly", "Paul", "Emily",
    "Andrew", "Donna", "Joshua", "Michelle", "Kenneth", "Carol", "Kevin", "Amanda", "Brian",
    "Melissa", "George", "Deborah", "Timothy", "Stephanie",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White", "Harris", "Sanchez",
    "Clark", "Ramirez", "Lewis", "Robinson", "Walker", "Young", "Allen", "King", "Wright",
    "Scott", "Torres", "Nguyen", "Hill", "Flores", "Green", "Adams", "Nelson", "Baker", "Hall",
    "Rivera", "Campbell", "Mitchell", "Carter", "Roberts",
];

const WORDS: &[&str] = &[
    "engine", "sensor", "pressure", "signal", "timeout", "voltage", "module", "failure", "reset",
    "battery", "control", "unit", "gear", "brake", "valve", "overheat", "network", "firmware",
    "calibration", "shaft", "hydraulic", "warning", "link", "lost", "detected", "low", "high",
    "check", "required", "restart",
];

// (latitude, longitude) pairs of places on land.
const LAND_LOCATIONS: &[(&str, &str)] = &[
    ("52.52437", "13.41053"),
    ("48.85341", "2.3488"),
    ("51.50853", "-0.12574"),
    ("40.71427", "-74.00597"),
    ("34.05223", "-118.24368"),
    ("35.6895", "139.69171"),
    ("-33.86785", "151.20732"),
    ("-23.5475", "-46.63611"),
    ("19.42847", "-99.12766"),
    ("55.75222", "37.61556"),
    ("28.65195", "77.23149"),
    ("-1.28333", "36.81667"),
    ("30.06263", "31.24967"),
    ("-34.60372", "-58.38159"),
    ("59.32938", "18.06871"),
    ("47.37689", "8.54169"),
    ("1.28967", "103.85007"),
    ("64.13548", "-21.89541"),
    ("-26.20227", "28.04363"),
    ("43.70011", "-79.4163"),
];

const SENTENCE_MIN_WORDS: usize = 3;
const SENTENCE_MAX_WORDS: usize = 10;

/// Produces random [`Document`]s.
///
/// The generator owns its RNG, so every worker should have a separate one.
pub struct DocumentGenerator {
    rng: RngGen,
}

impl Default for DocumentGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentGenerator {
    pub fn new() -> Self {
        Self::with_rng(RngGen::new(rand::thread_rng().gen()))
    }

    pub fn with_rng(rng: RngGen) -> Self {
        Self { rng }
    }

    pub fn generate(&mut self) -> Document {
        let rng = &mut self.rng;
        Document {
            ts: Utc::now(),
            vehicleid: VEHICLE_ID.sample(rng),
            first_name: pick(rng, FIRST_NAMES).to_string(),
            last_name: pick(rng, LAST_NAMES).to_string(),
            temperature: TEMPERATURE.sample_float(rng),
            operatingtime: OPERATING_TIME.sample(rng),
            fuelusage: FUEL_USAGE.sample_decimal(rng),
            front_linkage_position: FRONT_LINKAGE_POSITION.sample(rng),
            drivingspeed: DRIVING_SPEED.sample(rng),
            enginestate: ENGINE_STATE.sample(rng),
            autopilot_system_state: AUTOPILOT_SYSTEM_STATE.sample(rng),
            engine_load: ENGINE_LOAD.sample_decimal(rng),
            position: land_position(rng),
            altitude: ALTITUDE.sample_float(rng),
            engine_rotation: ENGINE_ROTATION.sample_decimal(rng),
            front_pme_shaft: FRONT_PME_SHAFT.sample_decimal(rng),
            rear_linkage_position: REAR_LINKAGE_POSITION.sample(rng),
            four_wheel_driving_state: pick(
                rng,
                &[FourWheelDrivingState::Enabled, FourWheelDrivingState::Disabled],
            ),
            fuel_tank_level: FUEL_TANK_LEVEL.sample(rng),
            last_error_msg: sentence(rng),
            engine_temperature: ENGINE_TEMPERATURE.sample_float(rng),
            connection_state: pick(rng, &[ConnectionState::Online, ConnectionState::Offline]),
            lte_connection_level: LTE_CONNECTION_LEVEL.sample_decimal(rng),
            mode: pick(
                rng,
                &[
                    DrivingMode::LightSpeed,
                    DrivingMode::RidiculousSpeed,
                    DrivingMode::LudicrousSpeed,
                    DrivingMode::PlaidSpeed,
                ],
            ),
        }
    }
}

fn pick<T: Copy>(rng: &mut RngGen, items: &[T]) -> T {
    // All the lists above are non-empty constants.
    *items.choose(rng).unwrap()
}

fn land_position(rng: &mut RngGen) -> Position {
    let (latitude, longitude) = pick(rng, LAND_LOCATIONS);
    Position(latitude.to_string(), longitude.to_string())
}

fn sentence(rng: &mut RngGen) -> String {
    let len = rng.gen_range(SENTENCE_MIN_WORDS..=SENTENCE_MAX_WORDS);
    let words: Vec<&str> = (0..len).map(|_| pick(rng, WORDS)).collect();
    let mut sentence = words.join(" ");
    sentence[..1].make_ascii_uppercase();
    sentence.push('.');
    sentence
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    fn generator(seed: u128) -> DocumentGenerator {
        DocumentGenerator::with_rng(RngGen::new(seed))
    }

    #[test]
    fn test_generated_documents_are_valid() {
        let mut gen = generator(1);
        for _ in 0..10_000 {
            let doc = gen.generate();
            doc.validate().unwrap_or_else(|err| panic!("{err}: {doc:?}"));
        }
    }

    #[test]
    fn test_ranges_are_covered() {
        let mut gen = generator(2);
        let docs: Vec<Document> = (0..20_000).map(|_| gen.generate()).collect();

        let states: HashSet<i64> = docs.iter().map(|d| d.enginestate).collect();
        assert_eq!(states, HashSet::from([0, 1]));

        let modes: HashSet<DrivingMode> = docs.iter().map(|d| d.mode).collect();
        let expected: HashSet<DrivingMode> = DrivingMode::iter().collect();
        assert_eq!(modes, expected);

        let connection: HashSet<&str> = docs.iter().map(|d| d.connection_state.as_ref()).collect();
        assert_eq!(connection, HashSet::from(["online", "offline"]));

        assert!(docs.iter().any(|d| d.temperature < 0.0));
        assert!(docs.iter().any(|d| d.altitude < 0.0));
    }

    #[test]
    fn test_fixed_point_precision() {
        let mut gen = generator(3);
        for _ in 0..1000 {
            let doc = gen.generate();
            assert_eq!(doc.fuelusage.scale(), 2);
            assert_eq!(doc.engine_load.scale(), 1);
            let tenths = doc.temperature * 10.0;
            assert!((tenths - tenths.round()).abs() < 1e-6, "{}", doc.temperature);
        }
    }

    #[test]
    fn test_invalid_document_is_rejected() {
        let mut doc = generator(4).generate();
        doc.drivingspeed = 81;
        doc.validate().unwrap_err();

        let mut doc = generator(4).generate();
        doc.fuelusage = Decimal::new(5001, 2);
        doc.validate().unwrap_err();

        let mut doc = generator(4).generate();
        doc.last_name.clear();
        doc.validate().unwrap_err();
    }

    #[test]
    fn test_decimal_format() {
        assert_eq!(Decimal::new(1230, 2).to_string(), "12.30");
        assert_eq!(Decimal::new(-5, 1).to_string(), "-0.5");
        assert_eq!(Decimal::new(7, 0).to_string(), "7");
        assert_eq!(Decimal::new(3, 2).to_string(), "0.03");

        assert_eq!("12.30".parse::<Decimal>().unwrap(), Decimal::new(1230, 2));
        assert_eq!("-0.5".parse::<Decimal>().unwrap(), Decimal::new(-5, 1));
        "1.2.3".parse::<Decimal>().unwrap_err();
    }

    #[test]
    fn test_decimal_scale_limit() {
        assert!(serde_json::from_value::<Decimal>(serde_json::json!("0.00000000000000000001")).is_err());
        assert!("1.0000000000000000001".parse::<Decimal>().is_err());

        let finest: Decimal = "0.000000000000000001".parse().unwrap();
        assert_eq!(finest, Decimal::new(1, 18));
        assert_eq!(finest.to_string(), "0.000000000000000001");

        // Formatting never overflows, even for scales which cannot be parsed.
        assert_eq!(Decimal::new(-12, 25).to_string(), "-0.0000000000000000000000012");
        assert_eq!(Decimal::new(i64::MIN, 1).to_string(), "-922337203685477580.8");
    }

    #[test]
    fn test_document_json_shape() {
        let doc = generator(5).generate();
        let value = serde_json::to_value(&doc).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("_id"));
        assert!(object["position"].as_array().unwrap().len() == 2);
        assert!(object["fuelusage"].is_string());
        assert!(object["vehicleid"].is_i64());

        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back.ts, doc.ts);
        assert_eq!(back.name_key(), doc.name_key());
        assert_eq!(back.lte_connection_level, doc.lte_connection_level);
        assert_eq!(back.position, doc.position);
        assert_eq!(back.mode, doc.mode);
    }

    #[test]
    fn test_sentence() {
        let mut rng = RngGen::new(6);
        for _ in 0..100 {
            let s = sentence(&mut rng);
            assert!(s.ends_with('.'));
            assert!(s.chars().next().unwrap().is_ascii_uppercase());
            let words = s.split(' ').count();
            assert!((SENTENCE_MIN_WORDS..=SENTENCE_MAX_WORDS).contains(&words));
        }
    }
}
