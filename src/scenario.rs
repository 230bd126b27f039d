use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::fs;
use thiserror::Error;

use crate::models::common::WorldPoint;

/// 組み込みデモシナリオ
const DEMO_SCENARIO_YAML: &str = include_str!("../scenarios/demo.yaml");

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    #[serde(default)]
    pub seed: u64,
    /// 暴走防止用の最大ステップ数
    #[serde(default)]
    pub max_steps: Option<u64>,
}

/// タイル矩形
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct TileRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// 世界設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    pub width_tiles: i32,
    pub height_tiles: i32,
    #[serde(default = "default_tile_size")]
    pub tile_size: f64,
    /// 舗装道路（地上走行可能）の矩形
    #[serde(default)]
    pub streets: Vec<TileRect>,
}

fn default_tile_size() -> f64 {
    32.0
}

/// プレイヤー設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayersConfig {
    /// 人間が操作する勢力ID
    pub human: String,
}

/// 飛行状態機械と飛行計画の調整値
///
/// 距離はワールド単位、半径系は `_tiles` 接尾辞のものがタイル単位です。
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FlightTuning {
    pub takeoff_speed_min: f64,
    pub takeoff_speed_max: f64,
    pub landing_roll_speed_min: f64,
    pub liftoff_speed_scale: f64,
    pub taxi_speed: f64,
    pub taxi_accel_duration_s: f64,
    pub taxi_route_retry_s: f64,
    pub taxi_fallback_radius_tiles: i32,
    pub orbit_radius_tiles: f64,
    pub orbit_min_radius_tiles: f64,
    pub combat_orbit_radius_tiles: f64,
    pub combat_orbit_min_radius_tiles: f64,
    pub orbit_rps: f64,
    pub combat_orbit_rps_scale: f64,
    pub orbit_boost_trigger_ratio: f64,
    pub orbit_boost_scale: f64,
    pub orbit_boost_duration_s: f64,
    pub holding_radius_tiles: f64,
    pub holding_rps: f64,
    pub runway_clearance_tiles: f64,
    pub rtb_fuel_ratio: f64,
    pub mission_ready_fuel_ratio: f64,
    pub airborne_altitude_ratio: f64,
    pub fuel_burn_per_s: f64,
    pub refuel_per_s: f64,
    pub rearm_interval_s: f64,
    pub ground_accel: f64,
    pub air_accel: f64,
    pub turn_rate: f64,
    pub arrive_gain: f64,
    pub flight_effect_interval_s: f64,
}

impl Default for FlightTuning {
    fn default() -> Self {
        Self {
            takeoff_speed_min: 90.0,
            takeoff_speed_max: 132.0,
            landing_roll_speed_min: 27.0,
            liftoff_speed_scale: 0.5,
            taxi_speed: 60.0,
            taxi_accel_duration_s: 2.2,
            taxi_route_retry_s: 0.4,
            taxi_fallback_radius_tiles: 8,
            orbit_radius_tiles: 7.0,
            orbit_min_radius_tiles: 2.5,
            combat_orbit_radius_tiles: 10.0,
            combat_orbit_min_radius_tiles: 7.0,
            orbit_rps: 0.16,
            combat_orbit_rps_scale: 1.05,
            orbit_boost_trigger_ratio: 0.6,
            orbit_boost_scale: 1.3,
            orbit_boost_duration_s: 1.4,
            holding_radius_tiles: 10.0,
            holding_rps: 0.08,
            runway_clearance_tiles: 0.8,
            rtb_fuel_ratio: 0.2,
            mission_ready_fuel_ratio: 0.9,
            airborne_altitude_ratio: 0.8,
            fuel_burn_per_s: 0.5,
            refuel_per_s: 20.0,
            rearm_interval_s: 0.5,
            ground_accel: 600.0,
            air_accel: 450.0,
            turn_rate: 6.0,
            arrive_gain: 3.5,
            flight_effect_interval_s: 4.5,
        }
    }
}

/// 交戦制御の調整値
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CombatTuning {
    pub fire_interval_s: f64,
    pub range_multiplier: f64,
    /// 機首回頭速度（rad/s）
    pub rotation_rate: f64,
    pub volley_size: u32,
    pub volley_interval_s: f64,
    pub damage_per_rocket: f64,
    pub acquisition_radius_tiles: f64,
    pub standoff_min_tiles: f64,
    pub standoff_range_ratio: f64,
    pub standoff_drift_ratio: f64,
    pub resupply_retry_s: f64,
    pub resupply_commit_backoff_s: f64,
    pub notification_window_s: f64,
    pub notification_duration_s: f64,
    pub notification_message: String,
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            fire_interval_s: 4.0,
            range_multiplier: 1.8,
            rotation_rate: 4.0,
            volley_size: 2,
            volley_interval_s: 0.25,
            damage_per_rocket: 20.0,
            acquisition_radius_tiles: 14.0,
            standoff_min_tiles: 2.0,
            standoff_range_ratio: 0.9,
            standoff_drift_ratio: 0.25,
            resupply_retry_s: 1.2,
            resupply_commit_backoff_s: 3.0,
            notification_window_s: 5.0,
            notification_duration_s: 2.0,
            notification_message: "No available airfield for resupply!".to_string(),
        }
    }
}

/// 飛行場設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AirfieldConfig {
    pub id: String,
    pub owner: String,
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default = "default_airfield_width")]
    pub width: i32,
    #[serde(default = "default_airfield_height")]
    pub height: i32,
    #[serde(default = "default_structure_health")]
    pub health: f64,
}

fn default_airfield_width() -> i32 {
    12
}

fn default_airfield_height() -> i32 {
    6
}

fn default_structure_health() -> f64 {
    1000.0
}

/// 機体性能
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AircraftPerformance {
    pub cruise_speed: f64,
    pub max_altitude: f64,
    pub max_fuel: f64,
    pub max_ammo: u32,
    /// 基本射程（ワールド単位、交戦時は倍率を掛ける）
    pub weapon_range: f64,
    pub health: f64,
}

impl Default for AircraftPerformance {
    fn default() -> Self {
        Self {
            cruise_speed: 240.0,
            max_altitude: 100.0,
            max_fuel: 100.0,
            max_ammo: 8,
            weapon_range: 192.0,
            health: 100.0,
        }
    }
}

/// 機体設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AircraftConfig {
    pub id: String,
    pub owner: String,
    #[serde(default = "default_aircraft_class")]
    pub class: String,
    #[serde(default)]
    pub airfield: Option<String>,
    #[serde(default)]
    pub slot: Option<usize>,
    /// 飛行場に属さない機体の初期位置
    #[serde(default)]
    pub position: Option<WorldPoint>,
    #[serde(default)]
    pub fuel_ratio: Option<f64>,
    #[serde(default)]
    pub ammo: Option<u32>,
    #[serde(default)]
    pub allowed_to_attack: bool,
    #[serde(default)]
    pub performance: AircraftPerformance,
}

fn default_aircraft_class() -> String {
    "fighter".to_string()
}

/// 敵ユニット設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostileUnitConfig {
    pub id: String,
    pub owner: String,
    #[serde(default = "default_hostile_class")]
    pub class: String,
    pub position: WorldPoint,
    #[serde(default)]
    pub destination: Option<WorldPoint>,
    #[serde(default)]
    pub speed: f64,
    pub health: f64,
    #[serde(default)]
    pub altitude: f64,
}

fn default_hostile_class() -> String {
    "tank".to_string()
}

/// 建造物設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StructureConfig {
    pub id: String,
    pub owner: String,
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default = "default_structure_size")]
    pub width: i32,
    #[serde(default = "default_structure_size")]
    pub height: i32,
    #[serde(default = "default_structure_health")]
    pub health: f64,
}

fn default_structure_size() -> i32 {
    2
}

/// 敵戦力設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostilesConfig {
    #[serde(default)]
    pub units: Vec<HostileUnitConfig>,
    #[serde(default)]
    pub structures: Vec<StructureConfig>,
}

/// 時刻指定のシナリオイベント
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EventConfig {
    pub time_s: f64,
    #[serde(flatten)]
    pub action: EventAction,
}

/// イベントの種類
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventAction {
    Takeoff { aircraft: String },
    Attack { aircraft: String, target: String },
    Move { aircraft: String, x: f64, y: f64 },
    Land { aircraft: String },
    DestroyAircraft { aircraft: String },
    DestroyAirfield { airfield: String },
    Damage { target: String, amount: f64 },
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub world: WorldConfig,
    pub players: PlayersConfig,
    #[serde(default)]
    pub flight: FlightTuning,
    #[serde(default)]
    pub combat: CombatTuning,
    #[serde(default)]
    pub airfields: Vec<AirfieldConfig>,
    #[serde(default)]
    pub aircraft: Vec<AircraftConfig>,
    #[serde(default)]
    pub hostiles: HostilesConfig,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        Self::from_yaml_str(&contents, path)
    }

    /// 組み込みデモシナリオ
    pub fn demo() -> Result<Self, ScenarioError> {
        Self::from_yaml_str(DEMO_SCENARIO_YAML, Path::new("<demo>"))
    }

    /// YAML文字列から読み込み（`origin` はエラー表示用）
    pub fn from_yaml_str(contents: &str, origin: &Path) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(origin.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if self.sim.dt_s <= 0.0 {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if self.sim.t_max_s <= 0.0 {
            return Err(ScenarioError::ValidationError("t_max_s must be positive".to_string()));
        }

        // 世界範囲の検証
        if self.world.width_tiles <= 0 || self.world.height_tiles <= 0 || self.world.tile_size <= 0.0 {
            return Err(ScenarioError::ValidationError("World must have a positive size".to_string()));
        }

        for airfield in &self.airfields {
            let rect = TileRect {
                x: airfield.tile_x,
                y: airfield.tile_y,
                width: airfield.width,
                height: airfield.height,
            };
            if airfield.width <= 0 || airfield.height <= 0 || !self.is_rect_in_bounds(&rect) {
                return Err(ScenarioError::ValidationError(
                    format!("Airfield {} outside world bounds", airfield.id)
                ));
            }
        }

        // ID重複の検証
        let mut ids = HashSet::new();
        let all_ids = self.airfields.iter().map(|a| &a.id)
            .chain(self.aircraft.iter().map(|a| &a.id))
            .chain(self.hostiles.units.iter().map(|u| &u.id))
            .chain(self.hostiles.structures.iter().map(|s| &s.id));
        for id in all_ids {
            if !ids.insert(id.as_str()) {
                return Err(ScenarioError::ValidationError(format!("Duplicate id: {}", id)));
            }
        }

        let airfield_ids: HashSet<&str> = self.airfields.iter().map(|a| a.id.as_str()).collect();
        let aircraft_ids: HashSet<&str> = self.aircraft.iter().map(|a| a.id.as_str()).collect();

        for aircraft in &self.aircraft {
            if let Some(airfield) = &aircraft.airfield {
                if !airfield_ids.contains(airfield.as_str()) {
                    return Err(ScenarioError::ValidationError(
                        format!("Aircraft {} refers to unknown airfield {}", aircraft.id, airfield)
                    ));
                }
            }
            if let Some(ratio) = aircraft.fuel_ratio {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(ScenarioError::ValidationError(
                        format!("Aircraft {} fuel_ratio must be within [0, 1]", aircraft.id)
                    ));
                }
            }
        }

        // イベント参照の検証
        for event in &self.events {
            if event.time_s < 0.0 {
                return Err(ScenarioError::ValidationError(
                    format!("Event time {} must not be negative", event.time_s)
                ));
            }
            let (aircraft, other) = match &event.action {
                EventAction::Takeoff { aircraft }
                | EventAction::Land { aircraft }
                | EventAction::Move { aircraft, .. }
                | EventAction::DestroyAircraft { aircraft } => (Some(aircraft), None),
                EventAction::Attack { aircraft, target } => (Some(aircraft), Some(target)),
                EventAction::DestroyAirfield { airfield } => {
                    if !airfield_ids.contains(airfield.as_str()) {
                        return Err(ScenarioError::ValidationError(
                            format!("Event refers to unknown airfield {}", airfield)
                        ));
                    }
                    (None, None)
                }
                EventAction::Damage { target, .. } => (None, Some(target)),
            };
            if let Some(aircraft) = aircraft {
                if !aircraft_ids.contains(aircraft.as_str()) {
                    return Err(ScenarioError::ValidationError(
                        format!("Event refers to unknown aircraft {}", aircraft)
                    ));
                }
            }
            if let Some(target) = other {
                if !ids.contains(target.as_str()) {
                    return Err(ScenarioError::ValidationError(
                        format!("Event refers to unknown target {}", target)
                    ));
                }
            }
        }

        Ok(())
    }

    /// 矩形が世界範囲内かどうかをチェック
    fn is_rect_in_bounds(&self, rect: &TileRect) -> bool {
        rect.x >= 0 && rect.y >= 0 &&
        rect.x + rect.width <= self.world.width_tiles &&
        rect.y + rect.height <= self.world.height_tiles
    }

    /// 世界の大きさ（ワールド単位）
    pub fn world_size(&self) -> (f64, f64) {
        (
            self.world.width_tiles as f64 * self.world.tile_size,
            self.world.height_tiles as f64 * self.world.tile_size,
        )
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("シード値: {}", self.sim.seed);
        println!("マップ: {}x{} タイル (1タイル = {:.0})", self.world.width_tiles, self.world.height_tiles, self.world.tile_size);
        println!();

        println!("=== 航空戦力 ===");
        println!("飛行場: {}箇所", self.airfields.len());
        for airfield in &self.airfields {
            let based = self.aircraft.iter()
                .filter(|a| a.airfield.as_deref() == Some(airfield.id.as_str()))
                .count();
            println!("  {} ({}): 配備機 {}機", airfield.id, airfield.owner, based);
        }
        println!("機体: {}機", self.aircraft.len());
        let total_ammo: u32 = self.aircraft.iter()
            .map(|a| a.ammo.unwrap_or(a.performance.max_ammo))
            .sum();
        println!("総搭載ロケット数: {}発", total_ammo);
        println!();

        println!("=== 敵戦力 ===");
        println!("ユニット: {}", self.hostiles.units.len());
        println!("建造物: {}", self.hostiles.structures.len());
        println!("イベント: {}件", self.events.len());
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}
