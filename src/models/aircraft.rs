use std::collections::VecDeque;
use std::fmt;

use crate::models::{
    traits::IAgent,
    common::{WorldPoint, Velocity2D, TilePos, ShadowHint},
    target::TargetRef,
};
use crate::scenario::AircraftPerformance;
use tracing::debug;

/// 飛行フェーズ（状態機械の内部状態）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightPhase {
    Parked,
    WaitTakeoffClearance,
    TaxiToRunwayStart,
    TakeoffRoll,
    Liftoff,
    Airborne,
    WaitLandingClearance,
    ApproachRunway,
    LandingRoll,
    TaxiToParking,
}

/// 外部から観測される飛行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightState {
    Grounded,
    Takeoff,
    Airborne,
    Landing,
}

impl FlightPhase {
    /// フェーズから一意に決まる飛行状態
    pub fn flight_state(self) -> FlightState {
        match self {
            FlightPhase::Parked
            | FlightPhase::WaitTakeoffClearance
            | FlightPhase::TaxiToRunwayStart
            | FlightPhase::TakeoffRoll
            | FlightPhase::TaxiToParking => FlightState::Grounded,
            FlightPhase::Liftoff => FlightState::Takeoff,
            FlightPhase::Airborne
            | FlightPhase::WaitLandingClearance
            | FlightPhase::ApproachRunway => FlightState::Airborne,
            FlightPhase::LandingRoll => FlightState::Landing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlightPhase::Parked => "parked",
            FlightPhase::WaitTakeoffClearance => "wait_takeoff_clearance",
            FlightPhase::TaxiToRunwayStart => "taxi_to_runway_start",
            FlightPhase::TakeoffRoll => "takeoff_roll",
            FlightPhase::Liftoff => "liftoff",
            FlightPhase::Airborne => "airborne",
            FlightPhase::WaitLandingClearance => "wait_landing_clearance",
            FlightPhase::ApproachRunway => "approach_runway",
            FlightPhase::LandingRoll => "landing_roll",
            FlightPhase::TaxiToParking => "taxi_to_parking",
        }
    }

    /// 燃料を消費する（空中にいる）フェーズか
    pub fn burns_fuel(self) -> bool {
        matches!(
            self,
            FlightPhase::Liftoff
                | FlightPhase::Airborne
                | FlightPhase::WaitLandingClearance
                | FlightPhase::ApproachRunway
                | FlightPhase::LandingRoll
        )
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 割り当て目的地の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationMode {
    /// 移動命令による地点
    Manual,
    /// 交戦対象
    Combat,
}

/// 割り当て目的地（点＋モード＋追従対象）
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedDestination {
    pub point: WorldPoint,
    pub stop_radius: f64,
    pub mode: DestinationMode,
    pub follow: Option<TargetRef>,
}

/// 操舵目標の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Manual,
    Combat,
    /// 射程外からの接近点
    Standoff,
    Orbit,
    /// 着陸待機の旋回
    Holding,
    /// 滑走路への進入
    Approach,
}

/// 現在の操舵目標
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlan {
    pub point: WorldPoint,
    pub stop_radius: f64,
    pub mode: PlanMode,
    pub follow: Option<TargetRef>,
}

impl FlightPlan {
    /// 割り当て目的地をそのまま操舵目標にしたもの
    pub fn from_destination(destination: &AssignedDestination) -> Self {
        Self {
            point: destination.point,
            stop_radius: destination.stop_radius,
            mode: match destination.mode {
                DestinationMode::Manual => PlanMode::Manual,
                DestinationMode::Combat => PlanMode::Combat,
            },
            follow: destination.follow.clone(),
        }
    }
}

/// 進行中の斉射
#[derive(Debug, Clone, PartialEq)]
pub struct VolleyState {
    pub remaining: u32,
    pub next_shot_at: f64,
    pub target: TargetRef,
}

/// 戦闘機
///
/// 位置は機体中心のワールド座標です。`desired_velocity` と `desired_rotation` は
/// 状態機械が毎ティック設定する希望値で、実際の位置・速度・向きは移動積分器が
/// 加速度・旋回率の制限をかけて更新します。
#[derive(Debug, Clone)]
pub struct Aircraft {
    pub id: String,
    pub owner: String,
    pub class: String,
    pub performance: AircraftPerformance,

    // 運動状態
    pub position: WorldPoint,
    pub velocity: Velocity2D,
    pub rotation: f64,
    pub desired_velocity: Velocity2D,
    pub desired_rotation: Option<f64>,
    /// このティックで交戦制御が機首方位を決めた
    pub combat_facing: bool,
    pub altitude: f64,
    pub shadow: ShadowHint,

    // 資源
    pub health: f64,
    pub fuel: f64,
    pub ammo: u32,

    // 飛行状態
    phase: FlightPhase,
    pub phase_history: Vec<(f64, FlightPhase)>,
    pub airfield_id: Option<String>,
    pub parking_slot: Option<usize>,
    pub landed_airfield_id: Option<String>,
    pub pending_takeoff: bool,
    pub landing_requested: bool,
    pub assigned_destination: Option<AssignedDestination>,
    pub flight_plan: Option<FlightPlan>,
    pub last_update: Option<f64>,

    // 旋回
    pub orbit_angle: f64,
    pub orbit_boost_until: Option<f64>,

    // 地上走行
    pub taxi_path: VecDeque<TilePos>,
    pub taxi_goal: Option<WorldPoint>,
    pub taxi_destination_tile: Option<TilePos>,
    pub taxi_start_time: Option<f64>,
    pub last_taxi_route_attempt: Option<f64>,
    pub speed_modifier: f64,

    // 交戦
    pub target: Option<TargetRef>,
    pub resume_target: Option<TargetRef>,
    pub allowed_to_attack: bool,
    pub can_fire: bool,
    pub ammo_empty: bool,
    pub auto_return_active: bool,
    pub resupply_retry_at: f64,
    pub last_resupply_notice_at: Option<f64>,
    pub last_shot_time: Option<f64>,
    pub volley: Option<VolleyState>,
    pub last_rearm_at: Option<f64>,

    // 演出
    pub takeoff_effect_played: bool,
    pub last_flight_effect_at: Option<f64>,

    // 統計
    pub sorties: u32,
    pub landings: u32,
    pub shots_fired: u32,
}

impl Aircraft {
    /// 新しい機体を作成
    ///
    /// 飛行場に属する機体は駐機状態、属さない機体は巡航高度で飛行状態から開始します。
    pub fn new(
        id: String,
        owner: String,
        class: String,
        performance: AircraftPerformance,
        position: WorldPoint,
        airfield_id: Option<String>,
    ) -> Self {
        let phase = if airfield_id.is_some() { FlightPhase::Parked } else { FlightPhase::Airborne };
        let altitude = if phase == FlightPhase::Airborne { performance.max_altitude } else { 0.0 };
        Self {
            id,
            owner,
            class,
            position,
            velocity: Velocity2D::zero(),
            rotation: 0.0,
            desired_velocity: Velocity2D::zero(),
            desired_rotation: None,
            combat_facing: false,
            altitude,
            shadow: ShadowHint::grounded(),
            health: performance.health,
            fuel: performance.max_fuel,
            ammo: performance.max_ammo,
            performance,
            phase,
            phase_history: vec![(0.0, phase)],
            airfield_id,
            parking_slot: None,
            landed_airfield_id: None,
            pending_takeoff: false,
            landing_requested: false,
            assigned_destination: None,
            flight_plan: None,
            last_update: None,
            orbit_angle: 0.0,
            orbit_boost_until: None,
            taxi_path: VecDeque::new(),
            taxi_goal: None,
            taxi_destination_tile: None,
            taxi_start_time: None,
            last_taxi_route_attempt: None,
            speed_modifier: 1.0,
            target: None,
            resume_target: None,
            allowed_to_attack: false,
            can_fire: true,
            ammo_empty: false,
            auto_return_active: false,
            resupply_retry_at: 0.0,
            last_resupply_notice_at: None,
            last_shot_time: None,
            volley: None,
            last_rearm_at: None,
            takeoff_effect_played: false,
            last_flight_effect_at: None,
            sorties: 0,
            landings: 0,
            shots_fired: 0,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    /// 飛行状態（フェーズの純関数）
    pub fn flight_state(&self) -> FlightState {
        self.phase.flight_state()
    }

    /// フェーズ遷移（履歴とログを残す）
    pub fn transition(&mut self, next: FlightPhase, now: f64) {
        if self.phase == next {
            return;
        }
        debug!(
            unit_id = %self.id,
            from = %self.phase,
            to = %next,
            time = now,
            "FLIGHT_PHASE_TRANSITION: 飛行フェーズが遷移しました"
        );
        self.phase = next;
        self.phase_history.push((now, next));
    }

    /// 弾薬が満載か
    pub fn is_fully_armed(&self) -> bool {
        self.ammo >= self.performance.max_ammo
    }

    pub fn fuel_ratio(&self) -> f64 {
        if self.performance.max_fuel <= 0.0 {
            return 1.0;
        }
        self.fuel / self.performance.max_fuel
    }

    /// 地上走行経路を破棄
    pub fn clear_taxi_route(&mut self) {
        self.taxi_path.clear();
        self.taxi_goal = None;
        self.taxi_destination_tile = None;
    }

    /// 地上走行経路が尽きたか
    pub fn taxi_route_finished(&self) -> bool {
        self.taxi_path.is_empty() && self.taxi_goal.is_none()
    }

    /// 推進を止める
    pub fn hold_position(&mut self) {
        self.desired_velocity = Velocity2D::zero();
    }

    /// 燃料を消費（0未満にはならない）
    pub fn burn_fuel(&mut self, amount: f64) {
        self.fuel = (self.fuel - amount).max(0.0);
    }

    /// ダメージを受ける
    ///
    /// # 戻り値
    ///
    /// 撃墜された場合はtrue
    pub fn take_damage(&mut self, damage: f64) -> bool {
        if self.health <= 0.0 {
            return false;
        }
        self.health = (self.health - damage).max(0.0);
        self.health <= 0.0
    }
}

impl IAgent for Aircraft {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.health > 0.0
    }
}
