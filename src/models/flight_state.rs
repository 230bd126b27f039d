//! # FlightState モジュール
//!
//! 戦闘機の飛行状態機械（駐機 → 離陸 → 飛行 → 着陸 → 駐機）を提供します。
//!
//! 各フェーズは毎ティック `update_flight_state` から処理され、状態機械は
//! 希望速度 `desired_velocity` と希望方位 `desired_rotation` を設定するだけで、
//! 実際の移動は積分器が行います。滑走路の使用権はポーリングで取得し、
//! 待機中の機体はブロックせずに次ティックで再試行します。
//!
//! 着陸を要求する前に駐機スロットを予約します。スロットがない機体は着陸キューに
//! 並ばずに上空で待機するため、滑走路開始点で駐機先のない機体が離陸待ちの機体を
//! 塞ぐことはありません。

use std::f64::consts::PI;

use crate::models::{
    aircraft::{Aircraft, DestinationMode, FlightPhase, FlightPlan, FlightState, PlanMode},
    airfield::{AirfieldManager, RunwayGeometry, RunwayOperationType},
    common::{TilePos, Velocity2D, WorldPoint, math_utils},
    flight_plan::FlightPlanResolver,
    target::WorldView,
    traits::{FlightEffect, IEffectHook, IPathFinder, PathOptions, SurfaceRestriction},
};
use crate::scenario::FlightTuning;
use tracing::{debug, info, trace};

/// 地上走行の到達判定（タイル数）
const TAXI_WAYPOINT_RADIUS_TILES: f64 = 0.3;
const TAXI_GOAL_RADIUS_TILES: f64 = 0.25;
const RUNWAY_START_REACHED_TILES: f64 = 0.6;
const PARKING_REACHED_TILES: f64 = 0.5;
const FALLBACK_PARKING_REACHED_TILES: f64 = 0.55;
const APPROACH_REACHED_TILES: f64 = 0.5;

/// 滑走路開始点への地上走行の速度係数（開始値と増分）
const TAXI_SPEED_MODIFIER_MIN: f64 = 0.45;
const TAXI_SPEED_MODIFIER_GAIN: f64 = 0.95;

/// 浮揚中の速度の下限比
const LIFTOFF_SPEED_BASE: f64 = 0.65;

/// 着陸滑走の初速（離陸最高速比・巡航速度比の大きい方）
const LANDING_ROLL_TAKEOFF_RATIO: f64 = 0.9;
const LANDING_ROLL_CRUISE_RATIO: f64 = 0.7;

/// 滑走路中心線への横方向補正
const RUNWAY_LATERAL_GAIN: f64 = 4.0;
const RUNWAY_LATERAL_LIMIT: f64 = 0.25;

/// 接地とみなす高度
const TOUCHDOWN_ALTITUDE: f64 = 1.0;

/// 飛行状態機械に渡すティック毎の文脈
pub struct FlightContext<'a> {
    pub now: f64,
    pub tile_size: f64,
    pub tuning: &'a FlightTuning,
    pub world: &'a WorldView,
    pub airfields: &'a mut AirfieldManager,
    pub path_finder: &'a dyn IPathFinder,
    pub effects: &'a mut dyn IEffectHook,
}

/// 自動帰投の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnReason {
    Fuel,
    Ammo,
    TargetLost,
}

impl ReturnReason {
    fn as_str(self) -> &'static str {
        match self {
            ReturnReason::Fuel => "fuel",
            ReturnReason::Ammo => "ammo",
            ReturnReason::TargetLost => "target_lost",
        }
    }
}

/// 飛行状態機械の1ティック分の更新
///
/// 所属飛行場が解決できない場合、地上の機体はその場で停止し、
/// 空中の機体は現在地を中心に旋回して再バインドを待ちます。
pub fn update_flight_state(aircraft: &mut Aircraft, ctx: &mut FlightContext) {
    let resolver = FlightPlanResolver::new(ctx.tuning, ctx.tile_size);
    refresh_target(aircraft, ctx.world, &resolver);

    let binding = aircraft.airfield_id.clone().and_then(|id| {
        let runway = *ctx.airfields.get(&id)?.runway()?;
        Some((id, runway))
    });
    let Some((airfield_id, runway)) = binding else {
        hold_without_airfield(aircraft, ctx, &resolver);
        aircraft.last_update = Some(ctx.now);
        return;
    };
    ctx.airfields.ensure_initialized(&airfield_id);

    if aircraft.landing_requested && aircraft.phase() == FlightPhase::Airborne {
        ctx.airfields.enqueue_operation(&airfield_id, &aircraft.id, RunwayOperationType::Landing);
        aircraft.transition(FlightPhase::WaitLandingClearance, ctx.now);
    }

    if aircraft.phase() == FlightPhase::Parked {
        update_parked(aircraft, ctx, &airfield_id);
    }
    if aircraft.phase() == FlightPhase::WaitTakeoffClearance {
        wait_takeoff_clearance(aircraft, ctx, &airfield_id, &runway);
    }

    match aircraft.phase() {
        FlightPhase::Parked | FlightPhase::WaitTakeoffClearance => {}
        FlightPhase::TaxiToRunwayStart => taxi_to_runway_start(aircraft, ctx, &runway),
        FlightPhase::TakeoffRoll => takeoff_roll(aircraft, ctx, &runway),
        FlightPhase::Liftoff => liftoff(aircraft, ctx, &airfield_id, &runway, &resolver),
        FlightPhase::Airborne => airborne(aircraft, ctx, &airfield_id, &resolver),
        FlightPhase::WaitLandingClearance | FlightPhase::ApproachRunway => {
            landing_clearance(aircraft, ctx, &airfield_id, &runway, &resolver)
        }
        FlightPhase::LandingRoll => landing_roll(aircraft, ctx, &airfield_id, &runway),
        FlightPhase::TaxiToParking => taxi_to_parking(aircraft, ctx, &airfield_id),
    }

    aircraft.last_update = Some(ctx.now);
}

/// 対象の生存確認と、対象がある場合の目的地補完
fn refresh_target(aircraft: &mut Aircraft, world: &WorldView, resolver: &FlightPlanResolver) {
    let Some(resolved) = aircraft.target.as_ref().map(|t| world.resolve(t)) else {
        return;
    };
    match resolved {
        None => {
            aircraft.target = None;
            let stale_combat = aircraft
                .assigned_destination
                .as_ref()
                .is_some_and(|d| d.mode == DestinationMode::Combat);
            if stale_combat && aircraft.flight_state() == FlightState::Grounded {
                aircraft.assigned_destination = None;
            }
        }
        Some(snapshot) if aircraft.assigned_destination.is_none() => {
            aircraft.assigned_destination = Some(resolver.combat_destination(&snapshot));
            aircraft.orbit_angle = snapshot.world_center().bearing_to(&aircraft.position);
        }
        Some(_) => {}
    }
}

/// 所属飛行場がない間の待機
fn hold_without_airfield(aircraft: &mut Aircraft, ctx: &mut FlightContext, resolver: &FlightPlanResolver) {
    if aircraft.flight_state() == FlightState::Grounded {
        aircraft.hold_position();
        return;
    }
    trace!(
        unit_id = %aircraft.id,
        phase = %aircraft.phase(),
        "AIRCRAFT_UNBOUND: 所属飛行場がないため旋回待機します"
    );
    if aircraft.phase() == FlightPhase::Airborne {
        let floor = aircraft.performance.max_altitude * ctx.tuning.airborne_altitude_ratio;
        aircraft.altitude = aircraft.altitude.max(floor);
    }
    if aircraft.assigned_destination.is_none() {
        aircraft.assigned_destination = Some(resolver.manual_destination(aircraft.position));
    }
    resolver.update_orbit(aircraft, ctx.world, ctx.now);
    steer_to_plan(aircraft, ctx.tuning);
}

fn update_parked(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str) {
    aircraft.altitude = 0.0;
    aircraft.hold_position();
    aircraft.takeoff_effect_played = false;
    let facing = aircraft
        .parking_slot
        .and_then(|index| ctx.airfields.get(airfield_id)?.slot(index).map(|s| s.facing));
    if let Some(facing) = facing {
        aircraft.desired_rotation = Some(facing);
    }

    if !aircraft.pending_takeoff {
        ctx.airfields.remove_queue_entry(airfield_id, &aircraft.id, None);
        return;
    }
    ctx.airfields.enqueue_operation(airfield_id, &aircraft.id, RunwayOperationType::Takeoff);
    aircraft.transition(FlightPhase::WaitTakeoffClearance, ctx.now);
}

/// 滑走路使用権と開始点の空きを待つ
fn wait_takeoff_clearance(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str, runway: &RunwayGeometry) {
    aircraft.altitude = 0.0;
    aircraft.hold_position();

    if !ctx.airfields.try_claim_operation(airfield_id, &aircraft.id, RunwayOperationType::Takeoff) {
        return;
    }
    let clearance = ctx.tuning.runway_clearance_tiles * ctx.tile_size;
    if !runway_start_clear(aircraft, ctx.world, runway.start.position, clearance) {
        return;
    }

    ctx.airfields.clear_slot_occupant(airfield_id, &aircraft.id);
    let landed_here = ctx.airfields.get(airfield_id).and_then(|a| a.landed_unit_id()) == Some(aircraft.id.as_str());
    if landed_here {
        ctx.airfields.set_landed_unit(airfield_id, None);
    }
    aircraft.landed_airfield_id = None;
    aircraft.desired_rotation = None;
    aircraft.taxi_start_time = Some(ctx.now);
    aircraft.transition(FlightPhase::TaxiToRunwayStart, ctx.now);
    route_taxi(aircraft, ctx, runway.start.position);
}

/// 滑走路開始点の近くに同種の地上機がいないか
fn runway_start_clear(aircraft: &Aircraft, world: &WorldView, start: WorldPoint, radius: f64) -> bool {
    !world.units.iter().any(|unit| {
        unit.id != aircraft.id
            && unit.class == aircraft.class
            && unit.grounded
            && unit.health > 0.0
            && unit.position.distance(&start) <= radius
    })
}

fn taxi_to_runway_start(aircraft: &mut Aircraft, ctx: &mut FlightContext, runway: &RunwayGeometry) {
    aircraft.altitude = 0.0;
    let started = *aircraft.taxi_start_time.get_or_insert(ctx.now);
    let duration = ctx.tuning.taxi_accel_duration_s.max(f64::EPSILON);
    let progress = math_utils::clamp01((ctx.now - started) / duration);
    aircraft.speed_modifier = TAXI_SPEED_MODIFIER_MIN + progress * TAXI_SPEED_MODIFIER_GAIN;
    let speed = ctx.tuning.taxi_speed * aircraft.speed_modifier;
    follow_taxi_route(aircraft, ctx.tile_size, ctx.tuning.arrive_gain, speed);

    if !aircraft.taxi_route_finished() {
        return;
    }
    let start = runway.start.position;
    let reached = aircraft.position.distance(&start) <= RUNWAY_START_REACHED_TILES * ctx.tile_size;
    if !reached {
        if taxi_retry_due(aircraft, ctx) {
            route_taxi(aircraft, ctx, start);
        }
        return;
    }

    aircraft.clear_taxi_route();
    aircraft.taxi_start_time = None;
    aircraft.speed_modifier = 1.0;
    aircraft.rotation = runway.start.facing;
    aircraft.desired_rotation = Some(runway.start.facing);
    aircraft.transition(FlightPhase::TakeoffRoll, ctx.now);
}

fn takeoff_roll(aircraft: &mut Aircraft, ctx: &mut FlightContext, runway: &RunwayGeometry) {
    aircraft.altitude = 0.0;
    aircraft.desired_rotation = Some(runway.start.facing);
    let tuning = ctx.tuning;
    let x = aircraft.position.x;
    let progress = math_utils::progress_between(x, runway.start.position.x, runway.liftoff.position.x);
    let speed = tuning.takeoff_speed_min
        + (tuning.takeoff_speed_max - tuning.takeoff_speed_min) * math_utils::ease_out_quad(progress);
    aircraft.desired_velocity = along_runway(aircraft, runway, speed);

    if x >= runway.liftoff.position.x {
        aircraft.pending_takeoff = false;
        aircraft.transition(FlightPhase::Liftoff, ctx.now);
    }
}

fn liftoff(
    aircraft: &mut Aircraft,
    ctx: &mut FlightContext,
    airfield_id: &str,
    runway: &RunwayGeometry,
    resolver: &FlightPlanResolver,
) {
    if !aircraft.takeoff_effect_played {
        ctx.effects.trigger(FlightEffect::Takeoff, &aircraft.id, aircraft.position);
        aircraft.takeoff_effect_played = true;
    }
    aircraft.desired_rotation = Some(runway.start.facing);

    let x = aircraft.position.x;
    let progress = math_utils::progress_between(x, runway.liftoff.position.x, runway.exit.position.x);
    let speed = aircraft.performance.cruise_speed
        * ctx.tuning.liftoff_speed_scale
        * (LIFTOFF_SPEED_BASE + (1.0 - LIFTOFF_SPEED_BASE) * math_utils::ease_out_sine(progress));
    aircraft.desired_velocity = along_runway(aircraft, runway, speed);
    aircraft.altitude = aircraft.performance.max_altitude * math_utils::ease_in_sine(progress);

    if x < runway.exit.position.x {
        return;
    }

    ctx.airfields.release_operation(airfield_id, &aircraft.id);
    aircraft.desired_rotation = None;
    aircraft.sorties += 1;
    if aircraft.assigned_destination.is_none() {
        let target = aircraft.target.as_ref().and_then(|t| ctx.world.resolve(t));
        aircraft.assigned_destination = Some(resolver.post_takeoff_destination(target.as_ref(), runway.exit.position));
    }
    aircraft.flight_plan = aircraft.assigned_destination.as_ref().map(FlightPlan::from_destination);
    aircraft.transition(FlightPhase::Airborne, ctx.now);
    info!(
        unit_id = %aircraft.id,
        airfield_id = %airfield_id,
        sorties = aircraft.sorties,
        "AIRCRAFT_AIRBORNE: 離陸しました"
    );
}

fn airborne(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str, resolver: &FlightPlanResolver) {
    let floor = aircraft.performance.max_altitude * ctx.tuning.airborne_altitude_ratio;
    aircraft.altitude = aircraft.altitude.max(floor);

    if !aircraft.landing_requested {
        if let Some(reason) = return_to_base_reason(aircraft, ctx) {
            aircraft.landing_requested = true;
            aircraft.flight_plan = None;
            // 燃料帰投では交戦目標を保持し、補給後に再出撃する
            if reason != ReturnReason::Fuel {
                aircraft.assigned_destination = None;
                aircraft.target = None;
            }
            ctx.airfields.enqueue_operation(airfield_id, &aircraft.id, RunwayOperationType::Landing);
            info!(
                unit_id = %aircraft.id,
                airfield_id = %airfield_id,
                reason = reason.as_str(),
                fuel = aircraft.fuel,
                ammo = aircraft.ammo,
                "AIRCRAFT_RTB: 基地へ帰投します"
            );
            aircraft.transition(FlightPhase::WaitLandingClearance, ctx.now);
            return;
        }
    }

    if aircraft.assigned_destination.is_none() {
        aircraft.assigned_destination = Some(resolver.manual_destination(aircraft.position));
    }
    if aircraft.flight_plan.is_none() {
        aircraft.flight_plan = aircraft.assigned_destination.as_ref().map(FlightPlan::from_destination);
    }
    let standoff = aircraft.flight_plan.as_ref().is_some_and(|p| p.mode == PlanMode::Standoff);
    if !standoff {
        resolver.update_orbit(aircraft, ctx.world, ctx.now);
    }
    steer_to_plan(aircraft, ctx.tuning);

    let effect_due = aircraft
        .last_flight_effect_at
        .is_none_or(|last| ctx.now - last >= ctx.tuning.flight_effect_interval_s);
    if effect_due {
        ctx.effects.trigger(FlightEffect::FlightLoop, &aircraft.id, aircraft.position);
        aircraft.last_flight_effect_at = Some(ctx.now);
    }
}

/// 自動帰投が必要か
///
/// 目標を持ったままの弾切れは交戦制御側が補給先を選ぶため、ここでは扱いません。
fn return_to_base_reason(aircraft: &Aircraft, ctx: &FlightContext) -> Option<ReturnReason> {
    if aircraft.performance.max_fuel > 0.0 && aircraft.fuel_ratio() <= ctx.tuning.rtb_fuel_ratio {
        return Some(ReturnReason::Fuel);
    }
    if aircraft.performance.max_ammo > 0
        && aircraft.ammo == 0
        && aircraft.volley.is_none()
        && aircraft.target.is_none()
    {
        return Some(ReturnReason::Ammo);
    }
    let target_lost = aircraft.assigned_destination.as_ref().is_some_and(|d| {
        d.mode == DestinationMode::Combat && d.follow.as_ref().is_some_and(|f| ctx.world.resolve(f).is_none())
    });
    target_lost.then_some(ReturnReason::TargetLost)
}

/// 着陸許可待ち・進入
fn landing_clearance(
    aircraft: &mut Aircraft,
    ctx: &mut FlightContext,
    airfield_id: &str,
    runway: &RunwayGeometry,
    resolver: &FlightPlanResolver,
) {
    let floor = aircraft.performance.max_altitude * ctx.tuning.airborne_altitude_ratio;
    if aircraft.phase() == FlightPhase::WaitLandingClearance {
        aircraft.altitude = aircraft.altitude.max(floor);
    }
    let exit = runway.exit.position;

    if reserve_parking_slot(aircraft, ctx.airfields, airfield_id).is_none() {
        // 駐機先がないまま滑走路を使わない
        ctx.airfields.remove_queue_entry(airfield_id, &aircraft.id, Some(RunwayOperationType::Landing));
        aircraft.transition(FlightPhase::WaitLandingClearance, ctx.now);
        aircraft.flight_plan = Some(resolver.holding_plan(aircraft, exit, 0, 1, ctx.now));
        steer_to_plan(aircraft, ctx.tuning);
        return;
    }

    ctx.airfields.enqueue_operation(airfield_id, &aircraft.id, RunwayOperationType::Landing);
    if !ctx.airfields.try_claim_operation(airfield_id, &aircraft.id, RunwayOperationType::Landing) {
        let (position, length) = ctx
            .airfields
            .get(airfield_id)
            .map(|a| {
                let queue = a.queue(RunwayOperationType::Landing);
                let position = a.queue_position(&aircraft.id, RunwayOperationType::Landing).unwrap_or(queue.len());
                (position, queue.len())
            })
            .unwrap_or((0, 1));
        aircraft.transition(FlightPhase::WaitLandingClearance, ctx.now);
        aircraft.flight_plan = Some(resolver.holding_plan(aircraft, exit, position, length, ctx.now));
        steer_to_plan(aircraft, ctx.tuning);
        return;
    }

    aircraft.transition(FlightPhase::ApproachRunway, ctx.now);
    aircraft.flight_plan = Some(resolver.approach_plan(exit));
    steer_to_plan(aircraft, ctx.tuning);

    if aircraft.position.distance(&exit) <= APPROACH_REACHED_TILES * ctx.tile_size {
        aircraft.flight_plan = None;
        ctx.effects.trigger(FlightEffect::Landing, &aircraft.id, aircraft.position);
        aircraft.transition(FlightPhase::LandingRoll, ctx.now);
    }
}

fn landing_roll(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str, runway: &RunwayGeometry) {
    aircraft.desired_rotation = Some(math_utils::normalize_angle(runway.start.facing + PI));
    let tuning = ctx.tuning;
    let x = aircraft.position.x;
    let start_x = runway.start.position.x;
    let liftoff_x = runway.liftoff.position.x;
    let exit_x = runway.exit.position.x;

    let roll_progress = 1.0 - math_utils::progress_between(x, start_x, exit_x);
    let speed_max = (tuning.takeoff_speed_max * LANDING_ROLL_TAKEOFF_RATIO)
        .max(aircraft.performance.cruise_speed * LANDING_ROLL_CRUISE_RATIO);
    let speed = speed_max - (speed_max - tuning.landing_roll_speed_min) * math_utils::ease_in_quad(roll_progress);
    aircraft.desired_velocity = along_runway(aircraft, runway, -speed);

    let profile = if x <= liftoff_x {
        0.0
    } else {
        let descent = math_utils::progress_between(x, liftoff_x, exit_x);
        aircraft.performance.max_altitude * math_utils::ease_out_sine(descent)
    };
    aircraft.altitude = aircraft.altitude.min(profile);

    if x > start_x || aircraft.altitude > TOUCHDOWN_ALTITUDE {
        return;
    }

    aircraft.altitude = 0.0;
    ctx.airfields.release_operation(airfield_id, &aircraft.id);
    aircraft.desired_rotation = None;
    aircraft.transition(FlightPhase::TaxiToParking, ctx.now);
    let slot_position = reserve_parking_slot(aircraft, ctx.airfields, airfield_id)
        .and_then(|index| ctx.airfields.get(airfield_id)?.slot(index).map(|s| s.position));
    match slot_position {
        Some(position) => route_taxi(aircraft, ctx, position),
        None => aircraft.clear_taxi_route(),
    }
}

fn taxi_to_parking(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str) {
    aircraft.altitude = 0.0;
    aircraft.speed_modifier = 1.0;
    follow_taxi_route(aircraft, ctx.tile_size, ctx.tuning.arrive_gain, ctx.tuning.taxi_speed);
    if !aircraft.taxi_route_finished() {
        return;
    }

    let Some(index) = reserve_parking_slot(aircraft, ctx.airfields, airfield_id) else {
        aircraft.hold_position();
        return;
    };
    let Some(slot_position) = ctx.airfields.get(airfield_id).and_then(|a| a.slot(index)).map(|s| s.position) else {
        return;
    };

    let tile_size = ctx.tile_size;
    let at_slot = aircraft.position.distance(&slot_position) <= PARKING_REACHED_TILES * tile_size;
    let at_fallback = aircraft.taxi_destination_tile.is_some_and(|tile| {
        tile != TilePos::from_world(&slot_position, tile_size)
            && aircraft.position.distance(&tile.center(tile_size)) <= FALLBACK_PARKING_REACHED_TILES * tile_size
    });
    if at_slot || at_fallback {
        park(aircraft, ctx, airfield_id, index);
        return;
    }

    aircraft.hold_position();
    if taxi_retry_due(aircraft, ctx) {
        route_taxi(aircraft, ctx, slot_position);
    }
}

/// 駐機を完了
fn park(aircraft: &mut Aircraft, ctx: &mut FlightContext, airfield_id: &str, slot_index: usize) {
    aircraft.hold_position();
    aircraft.landing_requested = false;
    aircraft.pending_takeoff = false;
    aircraft.flight_plan = None;
    aircraft.clear_taxi_route();
    aircraft.parking_slot = Some(slot_index);
    aircraft.landed_airfield_id = Some(airfield_id.to_string());
    aircraft.landings += 1;
    ctx.airfields.set_slot_occupant(airfield_id, slot_index, &aircraft.id);
    ctx.airfields.set_landed_unit(airfield_id, Some(&aircraft.id));
    aircraft.desired_rotation = ctx.airfields.get(airfield_id).and_then(|a| a.slot(slot_index)).map(|s| s.facing);
    aircraft.transition(FlightPhase::Parked, ctx.now);
    info!(
        unit_id = %aircraft.id,
        airfield_id = %airfield_id,
        slot = slot_index,
        landings = aircraft.landings,
        "AIRCRAFT_PARKED: 駐機しました"
    );
}

/// 駐機スロットを予約（既に占有していればそのスロット）
fn reserve_parking_slot(aircraft: &mut Aircraft, airfields: &mut AirfieldManager, airfield_id: &str) -> Option<usize> {
    let held = airfields.get(airfield_id)?.slot_of(&aircraft.id);
    let index = match held {
        Some(index) => index,
        None => airfields.claim_parking_slot(airfield_id, aircraft.parking_slot)?,
    };
    airfields.set_slot_occupant(airfield_id, index, &aircraft.id);
    aircraft.parking_slot = Some(index);
    Some(index)
}

fn taxi_retry_due(aircraft: &Aircraft, ctx: &FlightContext) -> bool {
    aircraft
        .last_taxi_route_attempt
        .is_none_or(|last| ctx.now - last > ctx.tuning.taxi_route_retry_s)
}

/// 地上走行経路を計算
///
/// 目的タイルへの経路がなければ、近傍の舗装タイルへの経路で代替します。
fn route_taxi(aircraft: &mut Aircraft, ctx: &FlightContext, goal: WorldPoint) {
    let tile_size = ctx.tile_size;
    aircraft.last_taxi_route_attempt = Some(ctx.now);
    aircraft.clear_taxi_route();

    let origin = TilePos::from_world(&aircraft.position, tile_size);
    let destination = TilePos::from_world(&goal, tile_size);
    let options = PathOptions::taxi(&aircraft.owner);
    let mut resolved = destination;
    let mut path = ctx.path_finder.find_path(origin, destination, &options);
    if path.is_empty() {
        let fallback = ctx.path_finder.nearest_surface_tile(
            destination,
            ctx.tuning.taxi_fallback_radius_tiles,
            SurfaceRestriction::PavedOnly,
        );
        if let Some(fallback) = fallback {
            resolved = fallback;
            path = ctx.path_finder.find_path(origin, fallback, &options);
        }
    }

    if path.is_empty() {
        debug!(
            unit_id = %aircraft.id,
            origin = ?origin,
            destination = ?destination,
            "TAXI_ROUTE_FAILED: 地上走行経路が見つかりません"
        );
        return;
    }

    aircraft.taxi_path = path.into_iter().skip(1).collect();
    aircraft.taxi_goal = Some(if resolved == destination { goal } else { resolved.center(tile_size) });
    aircraft.taxi_destination_tile = Some(resolved);
}

/// 経路の追従（中間点は全速、最終目標は減速して到達）
fn follow_taxi_route(aircraft: &mut Aircraft, tile_size: f64, arrive_gain: f64, speed: f64) {
    aircraft.desired_rotation = None;
    let waypoint_radius = TAXI_WAYPOINT_RADIUS_TILES * tile_size;
    while aircraft
        .taxi_path
        .front()
        .is_some_and(|tile| tile.center(tile_size).distance(&aircraft.position) <= waypoint_radius)
    {
        aircraft.taxi_path.pop_front();
    }

    if let Some(next) = aircraft.taxi_path.front() {
        let heading = aircraft.position.bearing_to(&next.center(tile_size));
        aircraft.desired_velocity = Velocity2D::from_heading(heading, speed);
        return;
    }

    match aircraft.taxi_goal {
        Some(goal) if goal.distance(&aircraft.position) > TAXI_GOAL_RADIUS_TILES * tile_size => {
            aircraft.desired_velocity = arrive_velocity(aircraft.position, goal, speed, arrive_gain);
        }
        Some(_) => {
            aircraft.taxi_goal = None;
            aircraft.hold_position();
        }
        None => aircraft.hold_position(),
    }
}

/// 滑走路に沿った速度（中心線へ横方向補正）
fn along_runway(aircraft: &Aircraft, runway: &RunwayGeometry, vx: f64) -> Velocity2D {
    let limit = vx.abs() * RUNWAY_LATERAL_LIMIT;
    let vy = ((runway.start.position.y - aircraft.position.y) * RUNWAY_LATERAL_GAIN).clamp(-limit, limit);
    Velocity2D::new(vx, vy)
}

/// 目標点へ近づくほど減速する速度
fn arrive_velocity(from: WorldPoint, to: WorldPoint, max_speed: f64, gain: f64) -> Velocity2D {
    let distance = from.distance(&to);
    if distance <= f64::EPSILON {
        return Velocity2D::zero();
    }
    Velocity2D::from_heading(from.bearing_to(&to), (distance * gain).min(max_speed))
}

/// 現在の操舵目標へ向かう
fn steer_to_plan(aircraft: &mut Aircraft, tuning: &FlightTuning) {
    aircraft.desired_rotation = None;
    let Some(plan) = aircraft.flight_plan.as_ref() else {
        aircraft.hold_position();
        return;
    };
    if aircraft.position.distance(&plan.point) <= plan.stop_radius {
        aircraft.hold_position();
        return;
    }
    aircraft.desired_velocity = arrive_velocity(
        aircraft.position,
        plan.point,
        aircraft.performance.cruise_speed,
        tuning.arrive_gain,
    );
}
