//! # FlightPlan モジュール
//!
//! 空中の機体の操舵目標（旋回・スタンドオフ・直行点）を計算します。
//!
//! 旋回角の進み方は前回更新からの経過時間に比例するため、ティック間隔が
//! 変動しても同じ軌跡になります。

use std::f64::consts::TAU;

use crate::models::{
    aircraft::{Aircraft, AssignedDestination, DestinationMode, FlightPlan, PlanMode},
    common::WorldPoint,
    target::{TargetRef, TargetSnapshot, WorldView},
};
use crate::scenario::{CombatTuning, FlightTuning};

/// 旋回計算に使う最小経過時間（秒）
const MIN_ORBIT_DT_S: f64 = 0.016;

/// 旋回半径のうねり（周波数, 振幅タイル数）
const ORBIT_WAVE: (f64, f64) = (2.4, 0.7);
const COMBAT_ORBIT_WAVE: (f64, f64) = (2.4, 1.4);
const COMBAT_ORBIT_SECONDARY_WAVE: (f64, f64) = (1.3, 0.8);

/// 旋回目標点の停止半径（タイル数）
const ORBIT_STOP_RADIUS_TILES: f64 = 0.2;
const HOLDING_STOP_RADIUS_TILES: f64 = 0.25;
const APPROACH_STOP_RADIUS_TILES: f64 = 0.35;
const COMBAT_STOP_RADIUS_TILES: f64 = 0.25;

/// 離陸後に目的地がない場合、出口からどれだけ先を目指すか
const POST_TAKEOFF_LEAD_TILES: f64 = 6.0;
const POST_TAKEOFF_STOP_RADIUS_TILES: f64 = 2.0;

/// 旋回の形状パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitGeometry {
    pub base_radius: f64,
    pub min_radius: f64,
    pub boosted_radius: f64,
    /// うねりの最大振幅の合計
    pub wave_amplitude: f64,
    pub rps: f64,
}

impl OrbitGeometry {
    /// 旋回半径が取りうる上限
    pub fn max_radius(&self) -> f64 {
        self.boosted_radius + self.wave_amplitude
    }
}

/// 飛行計画リゾルバ
pub struct FlightPlanResolver<'a> {
    tuning: &'a FlightTuning,
    tile_size: f64,
}

impl<'a> FlightPlanResolver<'a> {
    pub fn new(tuning: &'a FlightTuning, tile_size: f64) -> Self {
        Self { tuning, tile_size }
    }

    /// 目的地モードに応じた旋回形状
    pub fn orbit_geometry(&self, combat: bool) -> OrbitGeometry {
        let tile = self.tile_size;
        let (base_tiles, min_tiles, rps, wave) = if combat {
            (
                self.tuning.combat_orbit_radius_tiles,
                self.tuning.combat_orbit_min_radius_tiles,
                self.tuning.orbit_rps * self.tuning.combat_orbit_rps_scale,
                COMBAT_ORBIT_WAVE.1 + COMBAT_ORBIT_SECONDARY_WAVE.1,
            )
        } else {
            (
                self.tuning.orbit_radius_tiles,
                self.tuning.orbit_min_radius_tiles,
                self.tuning.orbit_rps,
                ORBIT_WAVE.1,
            )
        };
        let base_radius = base_tiles * tile;
        OrbitGeometry {
            base_radius,
            min_radius: min_tiles * tile,
            boosted_radius: base_radius * self.tuning.orbit_boost_scale,
            wave_amplitude: wave * tile,
            rps,
        }
    }

    /// 追従対象の現在位置で目的地を更新
    ///
    /// 対象が撃破・消滅していれば元の目的地をそのまま返します。
    pub fn resolve_follow_destination(&self, destination: &AssignedDestination, world: &WorldView) -> AssignedDestination {
        let Some(follow) = &destination.follow else {
            return destination.clone();
        };
        match world.resolve(follow) {
            Some(snapshot) => AssignedDestination {
                point: snapshot.world_center(),
                ..destination.clone()
            },
            None => destination.clone(),
        }
    }

    /// 旋回計画を更新
    ///
    /// 割り当て目的地（追従対象があればその現在位置）を中心に旋回角を進め、
    /// うねりとブーストを加えた半径上の点を操舵目標にします。
    pub fn update_orbit(&self, aircraft: &mut Aircraft, world: &WorldView, now: f64) {
        let Some(assigned) = aircraft.assigned_destination.as_ref() else {
            return;
        };
        let center = self.resolve_follow_destination(assigned, world);
        let combat = center.mode == DestinationMode::Combat;
        let geometry = self.orbit_geometry(combat);

        let distance_to_center = aircraft.position.distance(&center.point);
        if distance_to_center < geometry.base_radius * self.tuning.orbit_boost_trigger_ratio {
            aircraft.orbit_boost_until = Some(now + self.tuning.orbit_boost_duration_s);
        }
        let boosted = aircraft.orbit_boost_until.is_some_and(|until| until > now);
        let radius_base = if boosted { geometry.boosted_radius } else { geometry.base_radius };

        let dt = (now - aircraft.last_update.unwrap_or(now)).max(MIN_ORBIT_DT_S);
        let angle = aircraft.orbit_angle + TAU * geometry.rps * dt;
        aircraft.orbit_angle = angle;

        let radius_wave = if combat {
            (angle * COMBAT_ORBIT_WAVE.0).sin() * COMBAT_ORBIT_WAVE.1 * self.tile_size
                + (angle * COMBAT_ORBIT_SECONDARY_WAVE.0).sin() * COMBAT_ORBIT_SECONDARY_WAVE.1 * self.tile_size
        } else {
            (angle * ORBIT_WAVE.0).sin() * ORBIT_WAVE.1 * self.tile_size
        };
        let radius = geometry.min_radius.max(radius_base + radius_wave);

        aircraft.flight_plan = Some(FlightPlan {
            point: center.point.offset(angle, radius),
            stop_radius: self.tile_size * ORBIT_STOP_RADIUS_TILES,
            mode: PlanMode::Orbit,
            follow: center.follow.clone(),
        });
        aircraft.assigned_destination = Some(center);
    }

    /// 着陸待機の旋回点（キュー順位で角度をずらす）
    pub fn holding_plan(&self, aircraft: &mut Aircraft, exit: WorldPoint, queue_position: usize, queue_length: usize, now: f64) -> FlightPlan {
        let dt = (now - aircraft.last_update.unwrap_or(now)).max(MIN_ORBIT_DT_S);
        aircraft.orbit_angle += TAU * self.tuning.holding_rps * dt;
        let queue_offset = queue_position as f64 * (TAU / queue_length.max(1) as f64);
        FlightPlan {
            point: exit.offset(aircraft.orbit_angle + queue_offset, self.tuning.holding_radius_tiles * self.tile_size),
            stop_radius: self.tile_size * HOLDING_STOP_RADIUS_TILES,
            mode: PlanMode::Holding,
            follow: None,
        }
    }

    /// 滑走路出口への進入目標
    pub fn approach_plan(&self, exit: WorldPoint) -> FlightPlan {
        FlightPlan {
            point: exit,
            stop_radius: self.tile_size * APPROACH_STOP_RADIUS_TILES,
            mode: PlanMode::Approach,
            follow: None,
        }
    }

    /// 交戦対象を中心とする目的地
    pub fn combat_destination(&self, target: &TargetSnapshot) -> AssignedDestination {
        AssignedDestination {
            point: target.world_center(),
            stop_radius: self.tile_size * COMBAT_STOP_RADIUS_TILES,
            mode: DestinationMode::Combat,
            follow: match &target.target {
                TargetRef::Point(_) => None,
                other => Some(other.clone()),
            },
        }
    }

    /// 移動命令の目的地
    pub fn manual_destination(&self, point: WorldPoint) -> AssignedDestination {
        AssignedDestination {
            point,
            stop_radius: self.tile_size * POST_TAKEOFF_STOP_RADIUS_TILES,
            mode: DestinationMode::Manual,
            follow: None,
        }
    }

    /// 離陸直後の目的地（生存中の対象、なければ滑走路出口の前方）
    pub fn post_takeoff_destination(&self, target: Option<&TargetSnapshot>, exit: WorldPoint) -> AssignedDestination {
        match target {
            Some(snapshot) => self.combat_destination(snapshot),
            None => self.manual_destination(WorldPoint::new(
                exit.x + self.tile_size * POST_TAKEOFF_LEAD_TILES,
                exit.y,
            )),
        }
    }

    /// スタンドオフ点の計算
    ///
    /// 対象から機体方向へ、射程内に収まる距離だけ離れた点を返します。
    /// 既存のスタンドオフ点からのずれが停止半径の一定割合以下なら `None`
    /// （既存の計画を維持）を返します。
    pub fn combat_standoff(
        &self,
        aircraft_position: WorldPoint,
        facing: f64,
        target_center: WorldPoint,
        effective_range: f64,
        combat: &CombatTuning,
        existing: Option<&FlightPlan>,
        follow: Option<TargetRef>,
        world: &WorldView,
    ) -> Option<FlightPlan> {
        let offset = aircraft_position - target_center;
        let mut magnitude = offset.x.hypot(offset.y);
        let (mut dir_x, mut dir_y) = (offset.x, offset.y);
        if magnitude < 1.0 {
            dir_x = facing.cos();
            dir_y = facing.sin();
            magnitude = 1.0;
        }
        let desired_distance = magnitude
            .min(effective_range * combat.standoff_range_ratio)
            .max(self.tile_size * combat.standoff_min_tiles);
        let standoff = world.clamp_point(
            WorldPoint::new(
                target_center.x + dir_x / magnitude * desired_distance,
                target_center.y + dir_y / magnitude * desired_distance,
            ),
            self.tile_size / 2.0,
        );
        let stop_radius = (desired_distance * 0.05).max(12.0);

        if let Some(plan) = existing.filter(|p| p.mode == PlanMode::Standoff) {
            if plan.point.distance(&standoff) <= stop_radius * combat.standoff_drift_ratio {
                return None;
            }
        }

        Some(FlightPlan {
            point: standoff,
            stop_radius,
            mode: PlanMode::Standoff,
            follow,
        })
    }
}
