//! # Combat モジュール
//!
//! 戦闘機の交戦制御（目標選択・射撃許可・補給帰投）を提供します。
//!
//! 毎ティック、飛行状態機械より先に実行されます。弾切れ時は最寄りの利用可能な
//! 味方飛行場へ帰投を確定させ、見つからなければ一定間隔で再試行しつつ、
//! 人間プレイヤーの機体であれば通知を出します（通知は時間窓で間引きます）。

use crate::models::{
    aircraft::{Aircraft, FlightPhase, FlightState, PlanMode, VolleyState},
    airfield::AirfieldManager,
    common::{WorldPoint, math_utils},
    flight_plan::FlightPlanResolver,
    target::{TargetRef, WorldView},
    traits::INotificationSink,
};
use crate::scenario::{CombatTuning, FlightTuning};
use tracing::{info, debug, trace};

/// 発射されたロケット（損害処理は外部に委ねる）
#[derive(Debug, Clone, PartialEq)]
pub struct ShotRecord {
    pub shooter_id: String,
    pub target: TargetRef,
    pub origin: WorldPoint,
    pub aim_point: WorldPoint,
    pub damage: f64,
    pub time: f64,
}

/// 交戦制御に渡すティック毎の文脈
pub struct CombatContext<'a> {
    pub now: f64,
    pub dt: f64,
    pub tile_size: f64,
    pub tuning: &'a CombatTuning,
    pub flight: &'a FlightTuning,
    pub world: &'a WorldView,
    pub airfields: &'a mut AirfieldManager,
    pub notifications: &'a mut dyn INotificationSink,
    pub shots: &'a mut Vec<ShotRecord>,
}

/// 出撃可能な搭載状態か（弾薬満載かつ燃料十分）
pub fn is_mission_ready(aircraft: &Aircraft, flight: &FlightTuning) -> bool {
    aircraft.is_fully_armed() && aircraft.fuel_ratio() >= flight.mission_ready_fuel_ratio
}

/// 交戦制御の1ティック分の更新
pub fn update_combat(aircraft: &mut Aircraft, ctx: &mut CombatContext) {
    aircraft.combat_facing = false;

    if aircraft.target.is_none() {
        resume_remembered_target(aircraft, ctx);
    }
    if aircraft.target.is_none() {
        acquire_target(aircraft, ctx);
    }

    let Some(target_ref) = aircraft.target.clone() else {
        drop_combat_plan(aircraft);
        return;
    };
    let Some(snapshot) = ctx.world.resolve(&target_ref) else {
        // 対象が撃破・消滅した
        aircraft.target = None;
        aircraft.volley = None;
        drop_combat_plan(aircraft);
        return;
    };

    let was_empty = aircraft.ammo_empty;
    let empty = aircraft.ammo == 0;
    aircraft.ammo_empty = empty;

    if empty {
        aircraft.can_fire = false;
        aircraft.volley = None;
        aircraft.resume_target = Some(target_ref);
        handle_out_of_ammo(aircraft, ctx, was_empty);
        return;
    }

    if aircraft.auto_return_active && !aircraft.is_fully_armed() {
        aircraft.can_fire = false;
        return;
    }
    aircraft.auto_return_active = false;
    aircraft.resupply_retry_at = 0.0;
    aircraft.can_fire = true;

    if aircraft.flight_state() != FlightState::Airborne {
        if aircraft.phase() == FlightPhase::Parked
            && !aircraft.landing_requested
            && !aircraft.pending_takeoff
            && is_mission_ready(aircraft, ctx.flight)
        {
            debug!(
                unit_id = %aircraft.id,
                target = ?target_ref,
                "MISSION_READY: 出撃準備が整いました"
            );
            aircraft.pending_takeoff = true;
        }
        return;
    }

    let target_center = snapshot.world_center();
    let distance = aircraft.position.distance(&target_center);
    let effective_range = aircraft.performance.weapon_range * ctx.tuning.range_multiplier;
    let in_range = distance <= effective_range;

    let desired_facing = aircraft.position.bearing_to(&target_center);
    aircraft.rotation = math_utils::smooth_rotate_towards(
        aircraft.rotation,
        desired_facing,
        ctx.tuning.rotation_rate * ctx.dt,
    );
    aircraft.combat_facing = true;

    if !in_range && !aircraft.landing_requested {
        let resolver = FlightPlanResolver::new(ctx.flight, ctx.tile_size);
        let follow = target_ref.id().map(|_| target_ref.clone());
        if let Some(plan) = resolver.combat_standoff(
            aircraft.position,
            aircraft.rotation,
            target_center,
            effective_range,
            ctx.tuning,
            aircraft.flight_plan.as_ref(),
            follow,
            ctx.world,
        ) {
            aircraft.flight_plan = Some(plan);
        }
    } else if in_range {
        drop_combat_plan(aircraft);
    }

    let can_attack = ctx.world.is_human(&aircraft.owner) || aircraft.allowed_to_attack;
    let reloaded = aircraft
        .last_shot_time
        .is_none_or(|last| ctx.now - last >= ctx.tuning.fire_interval_s);
    if in_range && can_attack && aircraft.can_fire && aircraft.volley.is_none() && reloaded {
        aircraft.volley = Some(VolleyState {
            remaining: ctx.tuning.volley_size.max(1).min(aircraft.ammo),
            next_shot_at: ctx.now,
            target: target_ref,
        });
        aircraft.last_shot_time = Some(ctx.now);
    }

    process_volley(aircraft, ctx);
}

/// スタンドオフ計画を破棄
fn drop_combat_plan(aircraft: &mut Aircraft) {
    if aircraft.flight_plan.as_ref().is_some_and(|p| p.mode == PlanMode::Standoff) {
        aircraft.flight_plan = None;
    }
}

/// 補給後、記憶していた目標へ復帰
fn resume_remembered_target(aircraft: &mut Aircraft, ctx: &CombatContext) {
    let Some(remembered) = aircraft.resume_target.clone() else {
        return;
    };
    let Some(snapshot) = ctx.world.resolve(&remembered) else {
        aircraft.resume_target = None;
        return;
    };
    if aircraft.phase() != FlightPhase::Parked || !is_mission_ready(aircraft, ctx.flight) {
        return;
    }
    let resolver = FlightPlanResolver::new(ctx.flight, ctx.tile_size);
    aircraft.assigned_destination = Some(resolver.combat_destination(&snapshot));
    aircraft.target = Some(remembered);
    aircraft.resume_target = None;
}

/// AI機の自動目標選択（敵ユニット優先、なければ敵建造物）
fn acquire_target(aircraft: &mut Aircraft, ctx: &CombatContext) {
    if ctx.world.is_human(&aircraft.owner) || aircraft.ammo == 0 || aircraft.landing_requested {
        return;
    }
    let eligible = match aircraft.phase() {
        FlightPhase::Airborne => true,
        FlightPhase::Parked => is_mission_ready(aircraft, ctx.flight),
        _ => false,
    };
    if !eligible {
        return;
    }

    let radius = ctx.tuning.acquisition_radius_tiles * ctx.tile_size;
    let position = aircraft.position;
    let nearest_unit = ctx.world.units.iter()
        .filter(|u| u.owner != aircraft.owner && u.health > 0.0)
        .map(|u| (u.position.distance(&position), TargetRef::Unit(u.id.clone())))
        .filter(|(d, _)| *d <= radius)
        .min_by(|a, b| a.0.total_cmp(&b.0));
    let nearest_structure = || ctx.world.structures.iter()
        .filter(|s| s.owner != aircraft.owner && s.health > 0.0)
        .map(|s| (s.center.distance(&position), TargetRef::Structure(s.id.clone())))
        .filter(|(d, _)| *d <= radius)
        .min_by(|a, b| a.0.total_cmp(&b.0));

    let Some((_, target)) = nearest_unit.or_else(nearest_structure) else {
        return;
    };
    let Some(snapshot) = ctx.world.resolve(&target) else {
        return;
    };
    let resolver = FlightPlanResolver::new(ctx.flight, ctx.tile_size);
    let center = snapshot.world_center();
    aircraft.orbit_angle = center.bearing_to(&aircraft.position);
    aircraft.assigned_destination = Some(resolver.combat_destination(&snapshot));
    aircraft.allowed_to_attack = true;
    info!(
        unit_id = %aircraft.id,
        target = ?target,
        "TARGET_ACQUIRED: 目標を自動選択しました"
    );
    aircraft.target = Some(target);
}

/// 弾切れ時の補給帰投処理
fn handle_out_of_ammo(aircraft: &mut Aircraft, ctx: &mut CombatContext, was_empty: bool) {
    let already_landing = aircraft.landing_requested
        || aircraft.flight_state() != FlightState::Airborne;
    if already_landing {
        return;
    }
    if was_empty && ctx.now < aircraft.resupply_retry_at {
        return;
    }

    match find_resupply_pad(aircraft, ctx.airfields) {
        Some(pad_id) => {
            commit_resupply_return(aircraft, &pad_id, ctx);
            aircraft.resupply_retry_at = ctx.now + ctx.tuning.resupply_commit_backoff_s;
        }
        None => {
            aircraft.auto_return_active = false;
            aircraft.resupply_retry_at = ctx.now + ctx.tuning.resupply_retry_s;
            debug!(
                unit_id = %aircraft.id,
                retry_at = aircraft.resupply_retry_at,
                "RESUPPLY_UNAVAILABLE: 補給可能な飛行場がありません"
            );
            if ctx.world.is_human(&aircraft.owner) {
                let notice_due = !was_empty
                    || aircraft
                        .last_resupply_notice_at
                        .is_none_or(|last| ctx.now - last > ctx.tuning.notification_window_s);
                if notice_due {
                    ctx.notifications.notify(&ctx.tuning.notification_message, ctx.tuning.notification_duration_s);
                    aircraft.last_resupply_notice_at = Some(ctx.now);
                }
            }
        }
    }
}

/// 最寄りの利用可能な味方飛行場
///
/// 健在で同じ勢力に属し、空きスロット（または自機のスロット）がある飛行場が対象です。
pub fn find_resupply_pad(aircraft: &Aircraft, airfields: &AirfieldManager) -> Option<String> {
    airfields
        .airfields()
        .filter(|a| a.health > 0.0 && a.owner == aircraft.owner)
        .filter(|a| a.has_free_slot() || a.slot_of(&aircraft.id).is_some())
        .min_by(|a, b| {
            a.center().distance(&aircraft.position)
                .total_cmp(&b.center().distance(&aircraft.position))
        })
        .map(|a| a.id.clone())
}

/// 補給先飛行場への帰投を確定
fn commit_resupply_return(aircraft: &mut Aircraft, pad_id: &str, ctx: &mut CombatContext) {
    if aircraft.airfield_id.as_deref() != Some(pad_id) {
        if let Some(previous) = aircraft.airfield_id.take() {
            ctx.airfields.release_unit(&previous, &aircraft.id);
        }
        aircraft.parking_slot = None;
        aircraft.airfield_id = Some(pad_id.to_string());
    }
    aircraft.landing_requested = true;
    aircraft.auto_return_active = true;
    aircraft.flight_plan = None;
    info!(
        unit_id = %aircraft.id,
        airfield_id = %pad_id,
        reason = "resupply",
        "AIRCRAFT_RTB: 補給のため帰投します"
    );
}

/// 斉射の進行（予定時刻に達したロケットを発射）
fn process_volley(aircraft: &mut Aircraft, ctx: &mut CombatContext) {
    let Some(volley) = aircraft.volley.as_mut() else {
        return;
    };
    let Some(snapshot) = ctx.world.resolve(&volley.target) else {
        aircraft.volley = None;
        return;
    };
    let aim_point = snapshot.world_center();

    while volley.remaining > 0 && aircraft.ammo > 0 && ctx.now >= volley.next_shot_at {
        aircraft.ammo -= 1;
        aircraft.shots_fired += 1;
        volley.remaining -= 1;
        volley.next_shot_at += ctx.tuning.volley_interval_s;
        ctx.shots.push(ShotRecord {
            shooter_id: aircraft.id.clone(),
            target: volley.target.clone(),
            origin: aircraft.position,
            aim_point,
            damage: ctx.tuning.damage_per_rocket,
            time: ctx.now,
        });
        trace!(
            unit_id = %aircraft.id,
            target = ?volley.target,
            ammo_left = aircraft.ammo,
            "WEAPON_FIRED: ロケットを発射しました"
        );
    }

    if volley.remaining == 0 || aircraft.ammo == 0 {
        aircraft.volley = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::airfield::{Airfield, AirfieldFootprint};
    use crate::models::target::{UnitSnapshot, StructureSnapshot};
    use crate::scenario::AircraftPerformance;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        messages: Vec<String>,
    }

    impl INotificationSink for RecordingSink {
        fn notify(&mut self, message: &str, _duration_s: f64) {
            self.messages.push(message.to_string());
        }
    }

    fn world(owner_human: &str) -> WorldView {
        WorldView {
            current_time: 0.0,
            human_player: owner_human.to_string(),
            width: 5000.0,
            height: 5000.0,
            units: vec![UnitSnapshot {
                id: "H1".to_string(),
                owner: "red".to_string(),
                class: "tank".to_string(),
                position: WorldPoint::new(1000.0, 1000.0),
                altitude: 0.0,
                health: 100.0,
                grounded: true,
            }],
            structures: vec![StructureSnapshot {
                id: "S1".to_string(),
                owner: "red".to_string(),
                center: WorldPoint::new(1100.0, 1000.0),
                health: 100.0,
                is_airfield: false,
            }],
        }
    }

    fn airborne_fighter(owner: &str, position: WorldPoint) -> Aircraft {
        Aircraft::new(
            "F1".to_string(),
            owner.to_string(),
            "fighter".to_string(),
            AircraftPerformance::default(),
            position,
            None,
        )
    }

    struct Harness {
        combat: CombatTuning,
        flight: FlightTuning,
        airfields: AirfieldManager,
        sink: RecordingSink,
        shots: Vec<ShotRecord>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                combat: CombatTuning::default(),
                flight: FlightTuning::default(),
                airfields: AirfieldManager::new(),
                sink: RecordingSink::default(),
                shots: Vec::new(),
            }
        }

        fn tick(&mut self, aircraft: &mut Aircraft, world: &WorldView, now: f64) {
            let mut ctx = CombatContext {
                now,
                dt: 0.05,
                tile_size: 32.0,
                tuning: &self.combat,
                flight: &self.flight,
                world,
                airfields: &mut self.airfields,
                notifications: &mut self.sink,
                shots: &mut self.shots,
            };
            update_combat(aircraft, &mut ctx);
        }
    }

    #[test]
    fn test_in_range_human_fires_volley_with_interval() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("blue", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));

        harness.tick(&mut unit, &view, 0.0);
        assert_eq!(harness.shots.len(), 1);
        harness.tick(&mut unit, &view, 0.25);
        assert_eq!(harness.shots.len(), 2);
        assert!(unit.volley.is_none());
        assert_eq!(unit.ammo, unit.performance.max_ammo - 2);

        // 射撃間隔内は撃たない
        harness.tick(&mut unit, &view, 2.0);
        assert_eq!(harness.shots.len(), 2);
        harness.tick(&mut unit, &view, 4.0);
        assert_eq!(harness.shots.len(), 3);
    }

    #[test]
    fn test_ai_requires_authorization() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("green", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        unit.allowed_to_attack = false;
        harness.tick(&mut unit, &view, 0.0);
        assert!(harness.shots.is_empty());

        unit.allowed_to_attack = true;
        harness.tick(&mut unit, &view, 0.1);
        assert_eq!(harness.shots.len(), 1);
    }

    #[test]
    fn test_out_of_range_requests_standoff() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("blue", WorldPoint::new(3000.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        harness.tick(&mut unit, &view, 0.0);
        let plan = unit.flight_plan.clone().unwrap();
        assert_eq!(plan.mode, PlanMode::Standoff);
        assert!(harness.shots.is_empty());
        assert!(unit.combat_facing);
    }

    #[test]
    fn test_dead_target_is_cleared() {
        let mut harness = Harness::new();
        let mut view = world("blue");
        view.units[0].health = 0.0;
        let mut unit = airborne_fighter("blue", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        harness.tick(&mut unit, &view, 0.0);
        assert!(unit.target.is_none());
    }

    #[test]
    fn test_empty_ammo_commits_to_nearest_friendly_pad() {
        let mut harness = Harness::new();
        harness.airfields.add_airfield(Airfield::new(
            "AF1".to_string(), "blue".to_string(),
            AirfieldFootprint { tile_x: 2, tile_y: 2, width: 12, height: 6 }, 1000.0, 32.0,
        ));
        harness.airfields.add_airfield(Airfield::new(
            "RED".to_string(), "red".to_string(),
            AirfieldFootprint { tile_x: 40, tile_y: 30, width: 12, height: 6 }, 1000.0, 32.0,
        ));
        let view = world("blue");
        let mut unit = airborne_fighter("blue", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        unit.ammo = 0;

        harness.tick(&mut unit, &view, 0.0);
        assert_eq!(unit.airfield_id.as_deref(), Some("AF1"));
        assert!(unit.landing_requested);
        assert!(unit.auto_return_active);
        assert_eq!(unit.resume_target, Some(TargetRef::Unit("H1".to_string())));
        assert!(harness.sink.messages.is_empty());
    }

    #[test]
    fn test_no_pad_notification_rate_limited() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("blue", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        unit.ammo = 0;

        let mut now = 0.0;
        while now < 12.0 {
            harness.tick(&mut unit, &view, now);
            now += 0.05;
        }
        // 0秒, 5秒超過後, さらに5秒超過後の最大3回
        assert!(!harness.sink.messages.is_empty());
        assert!(harness.sink.messages.len() <= 3);
        assert!(!unit.landing_requested);
    }

    #[test]
    fn test_partial_ammo_while_returning_holds_fire() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("blue", WorldPoint::new(1200.0, 1000.0));
        unit.target = Some(TargetRef::Unit("H1".to_string()));
        unit.auto_return_active = true;
        unit.ammo = 3;
        harness.tick(&mut unit, &view, 0.0);
        assert!(!unit.can_fire);
        assert!(harness.shots.is_empty());
    }

    #[test]
    fn test_ai_auto_acquires_nearest_hostile_unit() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = airborne_fighter("green", WorldPoint::new(1150.0, 1000.0));
        harness.tick(&mut unit, &view, 0.0);
        assert_eq!(unit.target, Some(TargetRef::Unit("H1".to_string())));
        assert!(unit.allowed_to_attack);
        assert!(unit.assigned_destination.is_some());
    }

    #[test]
    fn test_parked_mission_ready_requests_takeoff() {
        let mut harness = Harness::new();
        let view = world("blue");
        let mut unit = Aircraft::new(
            "F1".to_string(), "blue".to_string(), "fighter".to_string(),
            AircraftPerformance::default(), WorldPoint::new(100.0, 100.0), Some("AF1".to_string()),
        );
        unit.target = Some(TargetRef::Structure("S1".to_string()));
        harness.tick(&mut unit, &view, 0.0);
        assert!(unit.pending_takeoff);

        let mut low_fuel = unit.clone();
        low_fuel.pending_takeoff = false;
        low_fuel.fuel = 10.0;
        harness.tick(&mut low_fuel, &view, 0.1);
        assert!(!low_fuel.pending_takeoff);
    }
}
