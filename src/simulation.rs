//! # Simulation モジュール
//!
//! 航空作戦シミュレーションの中核となるシミュレーションエンジンを提供します。
//!
//! このモジュールは、固定時間刻み（Δt）の時間駆動ループを管理し、
//! 飛行場・戦闘機・敵ユニット・建造物の協調動作を制御します。
//! 全ての状態変更は単一スレッドのティック内で行われます。
//!
//! ## シミュレーション処理順序
//!
//! 各時間刻みにおいて、以下の順序で処理が実行されます：
//!
//! 1. **イベント処理**: 時刻に達したシナリオイベント（命令・破壊・損害）の適用
//! 2. **再バインド**: 所属飛行場を失った空中機を最寄りの味方飛行場へ付け替え
//! 3. **ワールド状態の取得**: ティック開始時点のスナップショット作成
//! 4. **機体処理**: 機体ごとに交戦制御 → 飛行状態機械 → 運動積分 → 燃料・補給
//! 5. **敵ユニット処理**: 移動
//! 6. **損害処理**: 発射されたロケットの損害適用、撃破された機体の除去
//! 7. **滑走路の健全性維持**: 存在しない機体を参照するロック・キュー・スロットの除去
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use flightops::simulation::SimulationEngine;
//! use flightops::scenario::ScenarioConfig;
//!
//! let config = ScenarioConfig::from_file("scenarios/demo.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let summary = engine.run()?;
//! summary.print();
//! ```

use std::collections::{HashSet, VecDeque};

use crate::models::*;
use crate::models::combat::is_mission_ready;
use crate::scenario::*;
use thiserror::Error;
use tracing::{info, warn, debug, trace};

/// `max_steps` 未指定時のステップ上限
const DEFAULT_MAX_STEPS: u64 = 100_000;

/// 移動命令の目標点をワールド端から離す余白（タイル数）
const MOVE_MARGIN_TILES: f64 = 1.0;

/// シミュレーション初期化エラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("飛行場 {0} が見つかりません")]
    UnknownAirfield(String),
    #[error("飛行場 {airfield} に機体 {aircraft} を配置できる駐機スロットがありません")]
    NoParkingSlot { airfield: String, aircraft: String },
    #[error("機体 {0} には飛行場か初期位置のどちらかが必要です")]
    MissingSpawnPosition(String),
}

/// プレイヤー通知の記録
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub time: f64,
    pub message: String,
    pub duration_s: f64,
}

/// 通知の出力先（ログに記録して保持）
#[derive(Debug, Default)]
pub struct NotificationLog {
    pub current_time: f64,
    pub records: Vec<Notification>,
}

impl INotificationSink for NotificationLog {
    fn notify(&mut self, message: &str, duration_s: f64) {
        info!(
            time = self.current_time,
            duration_s = duration_s,
            "PLAYER_NOTIFICATION: {}", message
        );
        self.records.push(Notification {
            time: self.current_time,
            message: message.to_string(),
            duration_s,
        });
    }
}

/// 演出トリガーの記録
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRecord {
    pub time: f64,
    pub effect: FlightEffect,
    pub unit_id: String,
    pub position: WorldPoint,
}

/// 演出フック（ログに記録して保持）
#[derive(Debug, Default)]
pub struct EffectLog {
    pub current_time: f64,
    pub records: Vec<EffectRecord>,
}

impl IEffectHook for EffectLog {
    fn trigger(&mut self, effect: FlightEffect, unit_id: &str, position: WorldPoint) {
        trace!(
            unit_id = %unit_id,
            effect = ?effect,
            x = position.x,
            y = position.y,
            "FLIGHT_EFFECT: 演出をトリガーしました"
        );
        self.records.push(EffectRecord {
            time: self.current_time,
            effect,
            unit_id: unit_id.to_string(),
            position,
        });
    }
}

/// 撃墜された機体の残骸
#[derive(Debug, Clone, PartialEq)]
pub struct WreckRecord {
    pub unit_id: String,
    pub owner: String,
    pub position: WorldPoint,
    pub velocity: Velocity2D,
    pub time: f64,
}

/// 実行中に集計する統計
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationStats {
    /// 除去済み機体の出撃・着陸・発射数
    pub retired_sorties: u32,
    pub retired_landings: u32,
    pub retired_shots: u32,
    pub aircraft_lost: u32,
    pub hostiles_destroyed: u32,
    pub structures_destroyed: u32,
    pub airfields_destroyed: u32,
    pub stale_entries_purged: usize,
    pub rebinds: u32,
}

/// 機体ごとの最終状態
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftSummary {
    pub id: String,
    pub owner: String,
    pub phase: FlightPhase,
    pub airfield_id: Option<String>,
    pub fuel: f64,
    pub ammo: u32,
    pub sorties: u32,
    pub landings: u32,
}

/// 実行結果のサマリ
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub duration_s: f64,
    pub steps: u64,
    pub sorties: u32,
    pub landings: u32,
    pub shots_fired: u32,
    pub aircraft_lost: u32,
    pub hostiles_destroyed: u32,
    pub structures_destroyed: u32,
    pub airfields_destroyed: u32,
    pub notifications: usize,
    pub stale_entries_purged: usize,
    pub rebinds: u32,
    pub aircraft: Vec<AircraftSummary>,
}

impl SimulationSummary {
    /// 結果を表示
    pub fn print(&self) {
        println!("=== シミュレーション結果 ===");
        println!("実行時間: {:.1}秒 ({}ステップ)", self.duration_s, self.steps);
        println!("出撃: {}回 / 着陸: {}回", self.sorties, self.landings);
        println!("発射ロケット: {}発", self.shots_fired);
        println!("撃墜された機体: {}機", self.aircraft_lost);
        println!("撃破した敵ユニット: {} / 建造物: {}", self.hostiles_destroyed, self.structures_destroyed);
        println!("破壊された飛行場: {}箇所", self.airfields_destroyed);
        println!("プレイヤー通知: {}件", self.notifications);
        println!("再バインド: {}回 / 除去した古いエントリ: {}件", self.rebinds, self.stale_entries_purged);
        println!();
        println!("=== 機体の最終状態 ===");
        for aircraft in &self.aircraft {
            println!(
                "  {} ({}): {} 所属={} 燃料={:.1} 弾薬={} 出撃={} 着陸={}",
                aircraft.id,
                aircraft.owner,
                aircraft.phase,
                aircraft.airfield_id.as_deref().unwrap_or("-"),
                aircraft.fuel,
                aircraft.ammo,
                aircraft.sorties,
                aircraft.landings,
            );
        }
    }
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub seed: u64,
    pub step_count: u64,
    pub max_steps: u64,
    pub tile_size: f64,

    pub airfields: AirfieldManager,
    pub path_finder: GridPathFinder,
    pub aircraft: Vec<Aircraft>,
    pub hostiles: Vec<HostileUnit>,
    pub structures: Vec<Structure>,

    pub notifications: NotificationLog,
    pub effects: EffectLog,
    pub wrecks: Vec<WreckRecord>,
    pub stats: SimulationStats,
    pending_events: VecDeque<EventConfig>,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let grid = TerrainGrid::new(scenario.world.width_tiles, scenario.world.height_tiles);
        Self {
            current_time: 0.0,
            dt: scenario.sim.dt_s,
            max_time: scenario.sim.t_max_s,
            seed: scenario.sim.seed,
            step_count: 0,
            max_steps: scenario.sim.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
            tile_size: scenario.world.tile_size,
            airfields: AirfieldManager::new(),
            path_finder: GridPathFinder::new(grid),
            aircraft: Vec::new(),
            hostiles: Vec::new(),
            structures: Vec::new(),
            notifications: NotificationLog::default(),
            effects: EffectLog::default(),
            wrecks: Vec::new(),
            stats: SimulationStats::default(),
            pending_events: VecDeque::new(),
            scenario_config: scenario,
            verbose_level,
        }
    }

    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        self.initialize_terrain();
        self.initialize_airfields();
        self.initialize_hostiles();
        self.initialize_aircraft()?;
        self.initialize_events();

        if self.verbose_level > 0 {
            info!("初期化完了 (シード値: {}):", self.seed);
            info!("  飛行場: {}箇所", self.airfields.airfields().count());
            info!("  機体: {}機", self.aircraft.len());
            info!("  敵ユニット: {}", self.hostiles.len());
            info!("  建造物: {}", self.structures.len());
            info!("  イベント: {}件", self.pending_events.len());
        }

        Ok(())
    }

    fn initialize_terrain(&mut self) {
        let grid = self.path_finder.grid_mut();
        for street in &self.scenario_config.world.streets {
            grid.pave_rect(street);
        }
    }

    fn initialize_airfields(&mut self) {
        for config in &self.scenario_config.airfields {
            let footprint = AirfieldFootprint {
                tile_x: config.tile_x,
                tile_y: config.tile_y,
                width: config.width,
                height: config.height,
            };
            self.path_finder.grid_mut().place_airfield(&footprint, &config.owner);
            self.airfields.add_airfield(Airfield::new(
                config.id.clone(),
                config.owner.clone(),
                footprint,
                config.health,
                self.tile_size,
            ));

            if self.verbose_level > 1 {
                debug!("飛行場初期化: {} ({}) タイル({}, {})",
                        config.id, config.owner, config.tile_x, config.tile_y);
            }
        }
    }

    fn initialize_hostiles(&mut self) {
        for config in &self.scenario_config.hostiles.units {
            self.hostiles.push(HostileUnit::new(
                config.id.clone(),
                config.owner.clone(),
                config.class.clone(),
                config.position,
                config.destination,
                config.speed,
                config.health,
                config.altitude,
            ));
        }
        for config in &self.scenario_config.hostiles.structures {
            self.structures.push(Structure {
                id: config.id.clone(),
                owner: config.owner.clone(),
                footprint: AirfieldFootprint {
                    tile_x: config.tile_x,
                    tile_y: config.tile_y,
                    width: config.width,
                    height: config.height,
                },
                health: config.health,
            });
        }
    }

    fn initialize_aircraft(&mut self) -> Result<(), SimulationError> {
        for config in &self.scenario_config.aircraft {
            let mut placement = None;
            if let Some(airfield_id) = &config.airfield {
                if self.airfields.get(airfield_id).is_none() {
                    return Err(SimulationError::UnknownAirfield(airfield_id.clone()));
                }
                let index = self.airfields.claim_parking_slot(airfield_id, config.slot).ok_or_else(|| {
                    SimulationError::NoParkingSlot {
                        airfield: airfield_id.clone(),
                        aircraft: config.id.clone(),
                    }
                })?;
                let slot = self
                    .airfields
                    .get(airfield_id)
                    .and_then(|a| a.slot(index))
                    .cloned()
                    .ok_or_else(|| SimulationError::UnknownAirfield(airfield_id.clone()))?;
                placement = Some((airfield_id.clone(), slot));
            }

            let position = match (&placement, config.position) {
                (Some((_, slot)), _) => slot.position,
                (None, Some(position)) => position,
                (None, None) => return Err(SimulationError::MissingSpawnPosition(config.id.clone())),
            };

            let mut aircraft = Aircraft::new(
                config.id.clone(),
                config.owner.clone(),
                config.class.clone(),
                config.performance.clone(),
                position,
                placement.as_ref().map(|(id, _)| id.clone()),
            );
            if let Some(ratio) = config.fuel_ratio {
                aircraft.fuel = aircraft.performance.max_fuel * ratio;
            }
            if let Some(ammo) = config.ammo {
                aircraft.ammo = ammo.min(aircraft.performance.max_ammo);
            }
            aircraft.allowed_to_attack = config.allowed_to_attack;
            aircraft.shadow = ShadowHint::from_altitude(aircraft.altitude, aircraft.performance.max_altitude, self.tile_size);

            if let Some((airfield_id, slot)) = &placement {
                self.airfields.set_slot_occupant(airfield_id, slot.index, &aircraft.id);
                self.airfields.set_landed_unit(airfield_id, Some(&aircraft.id));
                aircraft.parking_slot = Some(slot.index);
                aircraft.landed_airfield_id = Some(airfield_id.clone());
                aircraft.rotation = slot.facing;
                aircraft.desired_rotation = Some(slot.facing);
            }

            if self.verbose_level > 1 {
                debug!("機体初期化: {} ({}) 所属={:?} フェーズ={}",
                        aircraft.id, aircraft.owner, aircraft.airfield_id, aircraft.phase());
            }

            self.aircraft.push(aircraft);
        }
        Ok(())
    }

    fn initialize_events(&mut self) {
        let mut events = self.scenario_config.events.clone();
        events.sort_by(|a, b| a.time_s.total_cmp(&b.time_s));
        self.pending_events = events.into();
    }

    pub fn run(&mut self) -> Result<SimulationSummary, SimulationError> {
        info!("=== シミュレーション実行開始 ===");

        while self.current_time < self.max_time {
            self.step();

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % 100 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!("進行状況: {:.1}% ({:.1}/{:.1}秒)", progress, self.current_time, self.max_time);
            }

            if self.step_count >= self.max_steps {
                warn!(max_steps = self.max_steps, "ステップ上限に達したため打ち切ります");
                break;
            }
        }

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);

        Ok(self.summary())
    }

    /// 1ティック進める
    pub fn step(&mut self) {
        let now = self.current_time;
        self.notifications.current_time = now;
        self.effects.current_time = now;

        self.process_events(now);
        self.rebind_orphaned_aircraft();
        let world = self.world_view();
        let shots = self.process_aircraft(&world);
        self.process_hostiles();
        self.apply_shots(shots);
        self.remove_destroyed_aircraft();
        self.purge_stale_references();

        self.current_time += self.dt;
        self.step_count += 1;
    }

    /// ティック開始時点のワールド状態
    pub fn world_view(&self) -> WorldView {
        let (width, height) = self.scenario_config.world_size();
        let aircraft = self.aircraft.iter().filter(|a| a.is_active()).map(|a| UnitSnapshot {
            id: a.id.clone(),
            owner: a.owner.clone(),
            class: a.class.clone(),
            position: a.position,
            altitude: a.altitude,
            health: a.health,
            grounded: a.flight_state() == FlightState::Grounded,
        });
        let hostiles = self.hostiles.iter().filter(|h| h.is_active()).map(|h| UnitSnapshot {
            id: h.id.clone(),
            owner: h.owner.clone(),
            class: h.class.clone(),
            position: h.position,
            altitude: h.altitude,
            health: h.health,
            grounded: h.altitude <= 0.0,
        });
        let airfields = self.airfields.airfields().filter(|a| a.is_active()).map(|a| StructureSnapshot {
            id: a.id.clone(),
            owner: a.owner.clone(),
            center: a.center(),
            health: a.health,
            is_airfield: true,
        });
        let structures = self.structures.iter().filter(|s| s.is_active()).map(|s| StructureSnapshot {
            id: s.id.clone(),
            owner: s.owner.clone(),
            center: s.footprint.center(self.tile_size),
            health: s.health,
            is_airfield: false,
        });

        WorldView {
            current_time: self.current_time,
            human_player: self.scenario_config.players.human.clone(),
            width,
            height,
            units: aircraft.chain(hostiles).collect(),
            structures: airfields.chain(structures).collect(),
        }
    }

    fn process_aircraft(&mut self, world: &WorldView) -> Vec<ShotRecord> {
        let mut shots = Vec::new();
        let now = self.current_time;
        let flight = &self.scenario_config.flight;
        let combat = &self.scenario_config.combat;

        for aircraft in self.aircraft.iter_mut() {
            if !aircraft.is_active() {
                continue;
            }

            let mut combat_ctx = CombatContext {
                now,
                dt: self.dt,
                tile_size: self.tile_size,
                tuning: combat,
                flight,
                world,
                airfields: &mut self.airfields,
                notifications: &mut self.notifications,
                shots: &mut shots,
            };
            update_combat(aircraft, &mut combat_ctx);

            let mut flight_ctx = FlightContext {
                now,
                tile_size: self.tile_size,
                tuning: flight,
                world,
                airfields: &mut self.airfields,
                path_finder: &self.path_finder,
                effects: &mut self.effects,
            };
            update_flight_state(aircraft, &mut flight_ctx);

            integrate_motion(aircraft, self.dt, flight);
            update_resources(aircraft, &self.airfields, flight, self.dt, now);
            aircraft.shadow = ShadowHint::from_altitude(aircraft.altitude, aircraft.performance.max_altitude, self.tile_size);
        }
        shots
    }

    fn process_hostiles(&mut self) {
        for hostile in &mut self.hostiles {
            if hostile.is_active() {
                hostile.move_agent(self.dt);
            }
        }
    }

    /// 発射されたロケットの損害を適用
    fn apply_shots(&mut self, shots: Vec<ShotRecord>) {
        for shot in shots {
            match &shot.target {
                TargetRef::Unit(id) | TargetRef::Structure(id) => {
                    self.apply_damage_to(id, shot.damage);
                }
                TargetRef::Point(point) => {
                    trace!(shooter = %shot.shooter_id, x = point.x, y = point.y, "地上点への射撃（損害なし）");
                }
            }
        }
    }

    /// IDで対象を探して損害を与える
    ///
    /// # 戻り値
    ///
    /// 対象が見つかった場合はtrue
    pub fn apply_damage_to(&mut self, target_id: &str, amount: f64) -> bool {
        if let Some(aircraft) = self.aircraft.iter_mut().find(|a| a.id == target_id && a.is_active()) {
            aircraft.take_damage(amount);
            return true;
        }
        if let Some(hostile) = self.hostiles.iter_mut().find(|h| h.id == target_id && h.is_active()) {
            if hostile.take_damage(amount) {
                self.stats.hostiles_destroyed += 1;
                info!(unit_id = %hostile.id, owner = %hostile.owner, "HOSTILE_DESTROYED: 敵ユニットを撃破しました");
            }
            return true;
        }
        if let Some(footprint) = self.airfields.get(target_id).map(|a| a.footprint) {
            if self.airfields.damage_airfield(target_id, amount) {
                self.on_airfield_removed(&footprint);
            }
            return true;
        }
        if let Some(structure) = self.structures.iter_mut().find(|s| s.id == target_id && s.is_active()) {
            if structure.take_damage(amount) {
                self.stats.structures_destroyed += 1;
                info!(structure_id = %structure.id, owner = %structure.owner, "STRUCTURE_DESTROYED: 建造物を破壊しました");
            }
            return true;
        }
        false
    }

    fn on_airfield_removed(&mut self, footprint: &AirfieldFootprint) {
        self.path_finder.grid_mut().clear_airfield(footprint);
        self.stats.airfields_destroyed += 1;
    }

    /// 撃墜された機体を除去し、飛行場の参照を解放
    fn remove_destroyed_aircraft(&mut self) {
        let (destroyed, alive): (Vec<Aircraft>, Vec<Aircraft>) =
            std::mem::take(&mut self.aircraft).into_iter().partition(|a| !a.is_active());
        self.aircraft = alive;

        for aircraft in destroyed {
            for airfield_id in aircraft.airfield_id.iter().chain(aircraft.landed_airfield_id.iter()) {
                self.airfields.release_unit(airfield_id, &aircraft.id);
            }
            info!(
                unit_id = %aircraft.id,
                owner = %aircraft.owner,
                phase = %aircraft.phase(),
                "AIRCRAFT_DESTROYED: 機体が撃墜されました"
            );
            self.stats.aircraft_lost += 1;
            self.stats.retired_sorties += aircraft.sorties;
            self.stats.retired_landings += aircraft.landings;
            self.stats.retired_shots += aircraft.shots_fired;
            self.wrecks.push(WreckRecord {
                unit_id: aircraft.id,
                owner: aircraft.owner,
                position: aircraft.position,
                velocity: aircraft.velocity,
                time: self.current_time,
            });
        }
    }

    fn purge_stale_references(&mut self) {
        let live: HashSet<String> = self.aircraft.iter().map(|a| a.id.clone()).collect();
        self.stats.stale_entries_purged += self.airfields.purge_stale(&live);
    }

    /// 所属飛行場を失った空中機を最寄りの味方飛行場へ付け替え
    ///
    /// 地上の機体は付け替えず、その場で停止します。
    fn rebind_orphaned_aircraft(&mut self) {
        for aircraft in self.aircraft.iter_mut() {
            let bound = aircraft.airfield_id.as_deref().is_some_and(|id| self.airfields.get(id).is_some());
            if bound || !aircraft.is_active() || aircraft.flight_state() == FlightState::Grounded {
                continue;
            }
            let Some(candidate) = self.airfields.find_rebind_candidate(&aircraft.owner, aircraft.position, &aircraft.id) else {
                continue;
            };

            let previous = aircraft.airfield_id.replace(candidate.clone());
            aircraft.parking_slot = None;
            aircraft.landed_airfield_id = None;
            match aircraft.phase() {
                FlightPhase::Liftoff => {
                    aircraft.takeoff_effect_played = false;
                    aircraft.transition(FlightPhase::Airborne, self.current_time);
                }
                FlightPhase::ApproachRunway | FlightPhase::LandingRoll => {
                    aircraft.flight_plan = None;
                    aircraft.landing_requested = true;
                    aircraft.transition(FlightPhase::WaitLandingClearance, self.current_time);
                }
                _ => {}
            }
            self.stats.rebinds += 1;
            info!(
                unit_id = %aircraft.id,
                from = ?previous,
                to = %candidate,
                phase = %aircraft.phase(),
                "AIRCRAFT_REBOUND: 所属飛行場を付け替えました"
            );
        }
    }

    fn process_events(&mut self, now: f64) {
        while self.pending_events.front().is_some_and(|e| e.time_s <= now + 1e-9) {
            let Some(event) = self.pending_events.pop_front() else {
                break;
            };
            debug!(time = now, action = ?event.action, "SCENARIO_EVENT: イベントを適用します");
            self.apply_event(&event.action);
        }
    }

    fn apply_event(&mut self, action: &EventAction) {
        let applied = match action {
            EventAction::Takeoff { aircraft } => self.command_takeoff(aircraft),
            EventAction::Attack { aircraft, target } => self.command_attack(aircraft, target),
            EventAction::Move { aircraft, x, y } => self.command_move(aircraft, WorldPoint::new(*x, *y)),
            EventAction::Land { aircraft } => self.command_land(aircraft),
            EventAction::DestroyAircraft { aircraft } => self.destroy_aircraft(aircraft),
            EventAction::DestroyAirfield { airfield } => self.destroy_airfield(airfield),
            EventAction::Damage { target, amount } => self.apply_damage_to(target, *amount),
        };
        if !applied {
            warn!(action = ?action, "SCENARIO_EVENT_IGNORED: イベントを適用できませんでした");
        }
    }

    fn aircraft_mut(&mut self, aircraft_id: &str) -> Option<&mut Aircraft> {
        self.aircraft.iter_mut().find(|a| a.id == aircraft_id && a.is_active())
    }

    /// 点が機体の所属飛行場の上にあるか
    fn is_on_own_airfield(&self, aircraft_id: &str, point: WorldPoint) -> bool {
        let tile = TilePos::from_world(&point, self.tile_size);
        self.aircraft
            .iter()
            .find(|a| a.id == aircraft_id)
            .and_then(|a| a.airfield_id.as_deref())
            .and_then(|id| self.airfields.get(id))
            .is_some_and(|airfield| airfield.footprint.contains_tile(tile))
    }

    /// 離陸命令（駐機中の機体のみ）
    pub fn command_takeoff(&mut self, aircraft_id: &str) -> bool {
        let Some(aircraft) = self.aircraft_mut(aircraft_id) else {
            return false;
        };
        if aircraft.phase() != FlightPhase::Parked {
            return false;
        }
        aircraft.pending_takeoff = true;
        info!(unit_id = %aircraft_id, "COMMAND_TAKEOFF: 離陸命令を受けました");
        true
    }

    /// 攻撃命令
    ///
    /// 駐機中の機体は、目標が自機の飛行場上にない限り離陸を要求します。
    pub fn command_attack(&mut self, aircraft_id: &str, target_id: &str) -> bool {
        let world = self.world_view();
        let Some(target) = world.target_ref_for(target_id) else {
            return false;
        };
        let Some(snapshot) = world.resolve(&target) else {
            return false;
        };
        let on_own_airfield = self.is_on_own_airfield(aircraft_id, snapshot.world_center());
        let resolver = FlightPlanResolver::new(&self.scenario_config.flight, self.tile_size);
        let destination = resolver.combat_destination(&snapshot);
        let Some(aircraft) = self.aircraft.iter_mut().find(|a| a.id == aircraft_id && a.is_active()) else {
            return false;
        };

        aircraft.orbit_angle = snapshot.world_center().bearing_to(&aircraft.position);
        aircraft.assigned_destination = Some(destination);
        aircraft.flight_plan = None;
        aircraft.target = Some(target.clone());
        aircraft.resume_target = None;
        aircraft.allowed_to_attack = true;
        if aircraft.phase() == FlightPhase::Parked && !on_own_airfield {
            aircraft.pending_takeoff = true;
        }
        cancel_landing_request(aircraft, &mut self.airfields, self.current_time);
        info!(unit_id = %aircraft_id, target = ?target, "COMMAND_ATTACK: 攻撃命令を受けました");
        true
    }

    /// 移動命令
    ///
    /// 自機の飛行場上の点への移動は、空中の機体にとっては着陸要求になります。
    pub fn command_move(&mut self, aircraft_id: &str, point: WorldPoint) -> bool {
        let world = self.world_view();
        let point = world.clamp_point(point, MOVE_MARGIN_TILES * self.tile_size);
        let on_own_airfield = self.is_on_own_airfield(aircraft_id, point);
        let resolver = FlightPlanResolver::new(&self.scenario_config.flight, self.tile_size);
        let destination = resolver.manual_destination(point);
        let Some(aircraft) = self.aircraft.iter_mut().find(|a| a.id == aircraft_id && a.is_active()) else {
            return false;
        };

        if on_own_airfield {
            if aircraft.flight_state() == FlightState::Grounded {
                return false;
            }
            aircraft.landing_requested = true;
            info!(unit_id = %aircraft_id, "COMMAND_MOVE: 自機の飛行場への移動を着陸要求として扱います");
            return true;
        }

        aircraft.orbit_angle = point.bearing_to(&aircraft.position);
        aircraft.assigned_destination = Some(destination);
        aircraft.flight_plan = None;
        aircraft.target = None;
        aircraft.volley = None;
        if aircraft.phase() == FlightPhase::Parked {
            aircraft.pending_takeoff = true;
        }
        cancel_landing_request(aircraft, &mut self.airfields, self.current_time);
        info!(unit_id = %aircraft_id, x = point.x, y = point.y, "COMMAND_MOVE: 移動命令を受けました");
        true
    }

    /// 着陸命令（空中の機体のみ）
    pub fn command_land(&mut self, aircraft_id: &str) -> bool {
        let Some(aircraft) = self.aircraft_mut(aircraft_id) else {
            return false;
        };
        if aircraft.flight_state() == FlightState::Grounded {
            return false;
        }
        aircraft.landing_requested = true;
        info!(unit_id = %aircraft_id, "COMMAND_LAND: 着陸命令を受けました");
        true
    }

    /// 機体を撃墜扱いにする（除去はこのティックの損害処理で行う）
    pub fn destroy_aircraft(&mut self, aircraft_id: &str) -> bool {
        let Some(aircraft) = self.aircraft_mut(aircraft_id) else {
            return false;
        };
        aircraft.health = 0.0;
        true
    }

    /// 飛行場を破壊（スロット・キュー・ロックも消滅）
    pub fn destroy_airfield(&mut self, airfield_id: &str) -> bool {
        match self.airfields.destroy_airfield(airfield_id) {
            Some(airfield) => {
                self.on_airfield_removed(&airfield.footprint);
                true
            }
            None => false,
        }
    }

    /// 現在の統計を集計
    pub fn summary(&self) -> SimulationSummary {
        let live_sorties: u32 = self.aircraft.iter().map(|a| a.sorties).sum();
        let live_landings: u32 = self.aircraft.iter().map(|a| a.landings).sum();
        let live_shots: u32 = self.aircraft.iter().map(|a| a.shots_fired).sum();
        SimulationSummary {
            duration_s: self.current_time,
            steps: self.step_count,
            sorties: self.stats.retired_sorties + live_sorties,
            landings: self.stats.retired_landings + live_landings,
            shots_fired: self.stats.retired_shots + live_shots,
            aircraft_lost: self.stats.aircraft_lost,
            hostiles_destroyed: self.stats.hostiles_destroyed,
            structures_destroyed: self.stats.structures_destroyed,
            airfields_destroyed: self.stats.airfields_destroyed,
            notifications: self.notifications.records.len(),
            stale_entries_purged: self.stats.stale_entries_purged,
            rebinds: self.stats.rebinds,
            aircraft: self
                .aircraft
                .iter()
                .map(|a| AircraftSummary {
                    id: a.id.clone(),
                    owner: a.owner.clone(),
                    phase: a.phase(),
                    airfield_id: a.airfield_id.clone(),
                    fuel: a.fuel,
                    ammo: a.ammo,
                    sorties: a.sorties,
                    landings: a.landings,
                })
                .collect(),
        }
    }
}

/// 着陸待ちの機体への新しい命令で着陸要求を取り消す
fn cancel_landing_request(aircraft: &mut Aircraft, airfields: &mut AirfieldManager, now: f64) {
    if !aircraft.landing_requested || aircraft.phase() != FlightPhase::WaitLandingClearance {
        return;
    }
    aircraft.landing_requested = false;
    aircraft.auto_return_active = false;
    if let Some(airfield_id) = aircraft.airfield_id.as_deref() {
        airfields.remove_queue_entry(airfield_id, &aircraft.id, Some(RunwayOperationType::Landing));
        airfields.clear_slot_occupant(airfield_id, &aircraft.id);
    }
    aircraft.transition(FlightPhase::Airborne, now);
}

/// 希望速度・希望方位への運動積分
///
/// 加速度（地上と空中で別）・最大速度・旋回率に制限をかけます。希望方位がなければ
/// 進行方向を向きますが、交戦制御が機首方位を決めたティックはそれを優先します。
pub fn integrate_motion(aircraft: &mut Aircraft, dt: f64, tuning: &FlightTuning) {
    let accel = if aircraft.flight_state() == FlightState::Grounded {
        tuning.ground_accel
    } else {
        tuning.air_accel
    };
    let max_speed = aircraft.performance.cruise_speed.max(tuning.takeoff_speed_max);
    aircraft.velocity = aircraft
        .velocity
        .move_towards(aircraft.desired_velocity, accel * dt)
        .clamp_magnitude(max_speed);

    if !aircraft.combat_facing {
        let heading = aircraft
            .desired_rotation
            .or_else(|| (aircraft.velocity.magnitude() > 1.0).then(|| aircraft.velocity.heading()));
        if let Some(heading) = heading {
            aircraft.rotation = math_utils::smooth_rotate_towards(aircraft.rotation, heading, tuning.turn_rate * dt);
        }
    }

    aircraft.position = aircraft.position.advance(aircraft.velocity, dt);
}

/// 燃料消費と、駐機中の補給（燃料・弾薬）
///
/// 弾薬が増えるのは健在な所属飛行場に駐機している間だけです。
fn update_resources(aircraft: &mut Aircraft, airfields: &AirfieldManager, tuning: &FlightTuning, dt: f64, now: f64) {
    let phase = aircraft.phase();
    let aloft = phase.burns_fuel() && (phase != FlightPhase::LandingRoll || aircraft.altitude > 0.0);
    if aloft {
        aircraft.burn_fuel(tuning.fuel_burn_per_s * dt);
        return;
    }
    if phase != FlightPhase::Parked {
        return;
    }
    let home_alive = aircraft.airfield_id.as_deref().is_some_and(|id| airfields.get(id).is_some());
    if !home_alive {
        return;
    }

    let max_fuel = aircraft.performance.max_fuel;
    if aircraft.fuel < max_fuel {
        aircraft.fuel = (aircraft.fuel + tuning.refuel_per_s * dt).min(max_fuel);
    }
    let rearm_due = aircraft.last_rearm_at.is_none_or(|last| now - last >= tuning.rearm_interval_s);
    if aircraft.ammo < aircraft.performance.max_ammo && rearm_due {
        aircraft.ammo += 1;
        aircraft.last_rearm_at = Some(now);
        if aircraft.is_fully_armed() {
            debug!(
                unit_id = %aircraft.id,
                mission_ready = is_mission_ready(aircraft, tuning),
                "AIRCRAFT_REARMED: 再武装が完了しました"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const BASE: &str = r#"
meta:
  version: "1"
  name: test
sim:
  dt_s: 0.05
  t_max_s: 120.0
world:
  width_tiles: 40
  height_tiles: 20
players:
  human: blue
"#;

    fn engine(body: &str) -> SimulationEngine {
        let yaml = format!("{}{}", BASE, body);
        let config = ScenarioConfig::from_yaml_str(&yaml, Path::new("test.yaml")).unwrap();
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        engine
    }

    fn aircraft<'a>(engine: &'a SimulationEngine, id: &str) -> &'a Aircraft {
        engine.aircraft.iter().find(|a| a.id == id).unwrap()
    }

    fn run_until(engine: &mut SimulationEngine, max_steps: usize, done: impl Fn(&SimulationEngine) -> bool) {
        for _ in 0..max_steps {
            if done(engine) {
                return;
            }
            engine.step();
        }
        panic!("condition not reached by t={:.2}", engine.current_time);
    }

    fn first_entry(aircraft: &Aircraft, phase: FlightPhase) -> Option<f64> {
        aircraft.phase_history.iter().find(|(_, p)| *p == phase).map(|(t, _)| *t)
    }

    const ONE_AIRFIELD: &str = r#"
airfields:
  - id: AF1
    owner: blue
    tile_x: 2
    tile_y: 2
"#;

    #[test]
    fn test_single_sortie_visits_every_phase() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
events:
  - time_s: 0.5
    action: takeoff
    aircraft: F1
  - time_s: 15.0
    action: land
    aircraft: F1
"#));
        run_until(&mut engine, 2000, |e| e.current_time > 15.0 && aircraft(e, "F1").phase() == FlightPhase::Parked);

        let f1 = aircraft(&engine, "F1");
        let phases: Vec<FlightPhase> = f1.phase_history.iter().map(|(_, p)| *p).collect();
        assert_eq!(
            phases,
            vec![
                FlightPhase::Parked,
                FlightPhase::WaitTakeoffClearance,
                FlightPhase::TaxiToRunwayStart,
                FlightPhase::TakeoffRoll,
                FlightPhase::Liftoff,
                FlightPhase::Airborne,
                FlightPhase::WaitLandingClearance,
                FlightPhase::ApproachRunway,
                FlightPhase::LandingRoll,
                FlightPhase::TaxiToParking,
                FlightPhase::Parked,
            ]
        );
        assert_eq!(f1.sorties, 1);
        assert_eq!(f1.landings, 1);
        let airfield = engine.airfields.get("AF1").unwrap();
        assert!(airfield.operation().is_none());
        assert_eq!(airfield.slot_of("F1"), f1.parking_slot);
        assert!(engine.effects.records.iter().any(|r| r.effect == FlightEffect::Takeoff));
        assert!(engine.effects.records.iter().any(|r| r.effect == FlightEffect::Landing));
    }

    #[test]
    fn test_runway_is_exclusive_and_fifo() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
  - id: F2
    owner: blue
    airfield: AF1
  - id: F3
    owner: blue
    airfield: AF1
events:
  - time_s: 0.5
    action: takeoff
    aircraft: F1
  - time_s: 0.5
    action: takeoff
    aircraft: F2
  - time_s: 0.5
    action: takeoff
    aircraft: F3
"#));
        let on_runway = [
            FlightPhase::TaxiToRunwayStart,
            FlightPhase::TakeoffRoll,
            FlightPhase::Liftoff,
        ];
        for _ in 0..1600 {
            engine.step();
            let active = engine.aircraft.iter().filter(|a| on_runway.contains(&a.phase())).count();
            assert!(active <= 1, "{} aircraft on the runway at t={:.2}", active, engine.current_time);
            let rolling = engine.aircraft.iter().filter(|a| a.phase() == FlightPhase::TakeoffRoll).count();
            assert!(rolling <= 1);
            if engine.aircraft.iter().all(|a| a.phase() == FlightPhase::Airborne) {
                break;
            }
        }

        let airborne: Vec<f64> = ["F1", "F2", "F3"]
            .iter()
            .map(|id| first_entry(aircraft(&engine, id), FlightPhase::Airborne).unwrap())
            .collect();
        assert!(airborne[0] < airborne[1] && airborne[1] < airborne[2]);
        for pair in [("F1", "F2"), ("F2", "F3")] {
            let released = first_entry(aircraft(&engine, pair.0), FlightPhase::Airborne).unwrap();
            let next_taxi = first_entry(aircraft(&engine, pair.1), FlightPhase::TaxiToRunwayStart).unwrap();
            assert!(next_taxi >= released);
            let roll_exit = first_entry(aircraft(&engine, pair.0), FlightPhase::Liftoff).unwrap();
            let next_roll = first_entry(aircraft(&engine, pair.1), FlightPhase::TakeoffRoll).unwrap();
            assert!(next_roll > roll_exit);
        }
    }

    #[test]
    fn test_stale_runway_lock_is_purged() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
events:
  - time_s: 0.0
    action: takeoff
    aircraft: F1
"#));
        assert!(engine.airfields.try_claim_operation("AF1", "ghost", RunwayOperationType::Takeoff));
        engine.step();
        engine.step();
        assert!(engine.stats.stale_entries_purged >= 1);
        run_until(&mut engine, 400, |e| aircraft(e, "F1").phase() == FlightPhase::Airborne);
    }

    #[test]
    fn test_destroyed_aircraft_releases_runway() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
  - id: F2
    owner: blue
    airfield: AF1
events:
  - time_s: 0.0
    action: takeoff
    aircraft: F1
  - time_s: 0.0
    action: takeoff
    aircraft: F2
  - time_s: 1.0
    action: destroy_aircraft
    aircraft: F1
"#));
        run_until(&mut engine, 600, |e| aircraft(e, "F2").phase() == FlightPhase::Airborne);
        assert_eq!(engine.wrecks.len(), 1);
        assert_eq!(engine.wrecks[0].unit_id, "F1");
        assert_eq!(engine.summary().aircraft_lost, 1);
        let airfield = engine.airfields.get("AF1").unwrap();
        assert_eq!(airfield.slot_of("F1"), None);
        assert_eq!(airfield.queue_position("F1", RunwayOperationType::Takeoff), None);
    }

    #[test]
    fn test_munitions_only_increase_while_parked() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
hostiles:
  units:
    - id: T1
      owner: red
      position: { x: 900.0, y: 420.0 }
      health: 1000000.0
events:
  - time_s: 0.0
    action: attack
    aircraft: F1
    target: T1
"#));
        let mut previous = aircraft(&engine, "F1").ammo;
        let mut rearmed = false;
        for _ in 0..2400 {
            engine.step();
            let f1 = aircraft(&engine, "F1");
            if f1.ammo > previous {
                assert_eq!(f1.phase(), FlightPhase::Parked, "ammo increased at t={:.2}", engine.current_time);
                rearmed = true;
            }
            previous = f1.ammo;
        }
        let f1 = aircraft(&engine, "F1");
        assert!(f1.shots_fired >= f1.performance.max_ammo);
        assert!(f1.landings >= 1);
        assert!(rearmed);
    }

    #[test]
    fn test_resupply_notifications_are_rate_limited() {
        let mut engine = engine(r#"
aircraft:
  - id: F1
    owner: blue
    position: { x: 400.0, y: 300.0 }
    ammo: 0
hostiles:
  units:
    - id: T1
      owner: red
      position: { x: 700.0, y: 300.0 }
      health: 500.0
events:
  - time_s: 0.0
    action: attack
    aircraft: F1
    target: T1
"#);
        for _ in 0..400 {
            engine.step();
        }
        let times: Vec<f64> = engine.notifications.records.iter().map(|n| n.time).collect();
        assert!(times.len() >= 3, "notifications: {:?}", times);
        assert!(times.len() <= 4, "notifications: {:?}", times);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] > engine.scenario_config.combat.notification_window_s);
        }
        assert_eq!(engine.notifications.records[0].message, "No available airfield for resupply!");
    }

    #[test]
    fn test_airfield_destruction_rebinds_airborne_and_stalls_grounded() {
        let mut engine = engine(r#"
airfields:
  - id: AF1
    owner: blue
    tile_x: 2
    tile_y: 2
  - id: AF2
    owner: blue
    tile_x: 20
    tile_y: 10
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
  - id: F2
    owner: blue
    airfield: AF1
events:
  - time_s: 0.5
    action: takeoff
    aircraft: F1
  - time_s: 15.0
    action: destroy_airfield
    airfield: AF1
  - time_s: 16.0
    action: land
    aircraft: F1
"#);
        run_until(&mut engine, 400, |e| e.current_time > 15.1);
        assert!(engine.airfields.get("AF1").is_none());
        assert_eq!(aircraft(&engine, "F1").airfield_id.as_deref(), Some("AF2"));
        assert_eq!(engine.stats.airfields_destroyed, 1);

        run_until(&mut engine, 2000, |e| aircraft(e, "F1").phase() == FlightPhase::Parked);
        let f1 = aircraft(&engine, "F1");
        assert_eq!(f1.landed_airfield_id.as_deref(), Some("AF2"));
        let f2 = aircraft(&engine, "F2");
        assert_eq!(f2.phase(), FlightPhase::Parked);
        assert_eq!(f2.airfield_id.as_deref(), Some("AF1"));
    }

    #[test]
    fn test_move_onto_own_airfield_becomes_landing_request() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
"#));
        let center = engine.airfields.get("AF1").unwrap().center();
        assert!(!engine.command_move("F1", center));
        assert!(!aircraft(&engine, "F1").pending_takeoff);

        assert!(engine.command_move("F1", WorldPoint::new(1000.0, 500.0)));
        assert!(aircraft(&engine, "F1").pending_takeoff);
        run_until(&mut engine, 600, |e| aircraft(e, "F1").phase() == FlightPhase::Airborne);
        assert!(engine.command_move("F1", center));
        assert!(aircraft(&engine, "F1").landing_requested);
    }

    #[test]
    fn test_integrate_motion_limits_acceleration_and_turn() {
        let tuning = FlightTuning::default();
        let mut unit = Aircraft::new(
            "F1".to_string(),
            "blue".to_string(),
            "fighter".to_string(),
            AircraftPerformance::default(),
            WorldPoint::new(0.0, 0.0),
            Some("AF1".to_string()),
        );
        unit.desired_velocity = Velocity2D::new(1000.0, 0.0);
        unit.desired_rotation = Some(std::f64::consts::PI / 2.0);
        integrate_motion(&mut unit, 0.1, &tuning);

        assert_relative_eq!(unit.velocity.x, tuning.ground_accel * 0.1, epsilon = 1e-9);
        assert_relative_eq!(unit.rotation, tuning.turn_rate * 0.1, epsilon = 1e-9);
        assert_relative_eq!(unit.position.x, unit.velocity.x * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_fuel_burns_only_aloft() {
        let mut engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
  - id: F2
    owner: blue
    position: { x: 800.0, y: 300.0 }
"#));
        for _ in 0..20 {
            engine.step();
        }
        assert_relative_eq!(aircraft(&engine, "F1").fuel, 100.0);
        let burned = 100.0 - aircraft(&engine, "F2").fuel;
        assert_relative_eq!(burned, 20.0 * 0.05 * engine.scenario_config.flight.fuel_burn_per_s, epsilon = 1e-6);
    }

    #[test]
    fn test_world_view_reports_grounded_flag() {
        let engine = engine(&format!("{}{}", ONE_AIRFIELD, r#"
aircraft:
  - id: F1
    owner: blue
    airfield: AF1
  - id: F2
    owner: blue
    position: { x: 800.0, y: 300.0 }
"#));
        let world = engine.world_view();
        assert!(world.unit("F1").unwrap().grounded);
        assert!(!world.unit("F2").unwrap().grounded);
        assert!(world.structure("AF1").unwrap().is_airfield);
    }

    #[test]
    fn test_initialize_rejects_overfull_airfield() {
        let aircraft: String = (0..8)
            .map(|i| format!("  - id: F{i}\n    owner: blue\n    airfield: AF1\n"))
            .collect();
        let yaml = format!("{}{}aircraft:\n{}", BASE, ONE_AIRFIELD, aircraft);
        let config = ScenarioConfig::from_yaml_str(&yaml, Path::new("test.yaml")).unwrap();
        let mut engine = SimulationEngine::new(config, 0);
        assert!(matches!(engine.initialize(), Err(SimulationError::NoParkingSlot { .. })));
    }
}
