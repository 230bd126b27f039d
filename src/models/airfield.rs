//! # Airfield モジュール
//!
//! 飛行場の共有資源（駐機スロットと1本の滑走路）を管理します。
//!
//! 駐機スロットの確保と滑走路ロックを分離しているため、任意の機数が同時に
//! 駐機できる一方で、滑走路を使用できるのは常に1機だけです。滑走路の使用権は
//! 離陸・着陸それぞれのFIFOキューの先頭機にのみ与えられ、各機は毎ティック
//! `try_claim_operation` をポーリングします（ブロッキング待ちは行いません）。
//!
//! 飛行場の状態（スロット占有表・キュー・実行中の滑走路操作）を変更できるのは
//! このモジュールの `AirfieldManager` だけです。

use std::collections::{HashSet, VecDeque};
use crate::models::{
    traits::IAgent,
    common::{WorldPoint, TilePos},
};
use tracing::{info, warn, debug};

/// 飛行場テンプレート画像の基準サイズ（正規化座標の分母）
const TEMPLATE_WIDTH: f64 = 768.0;
const TEMPLATE_HEIGHT: f64 = 512.0;

/// 駐機時の機首方位
const PARKED_FACING: f64 = -3.0 * std::f64::consts::FRAC_PI_4;

/// 駐機スロットのテンプレート座標
const PARKING_TEMPLATE: [(f64, f64); 7] = [
    (113.0, 378.0),
    (241.0, 378.0),
    (369.0, 378.0),
    (497.0, 378.0),
    (625.0, 378.0),
    (515.0, 62.0),
    (615.0, 62.0),
];

/// 滑走路テンプレート座標（開始点・離陸点・出口）
const RUNWAY_START_TEMPLATE: (f64, f64) = (30.0, 240.0);
const RUNWAY_LIFTOFF_TEMPLATE: (f64, f64) = (433.0, 240.0);
const RUNWAY_EXIT_TEMPLATE: (f64, f64) = (768.0, 240.0);

/// 格納庫ブロック（通行不可領域）のテンプレート矩形 (x_min, x_max, y_min, y_max)
const HANGAR_BLOCK_TEMPLATE: (f64, f64, f64, f64) = (0.0, 470.0, 0.0, 148.0);

/// 滑走路操作の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunwayOperationType {
    Takeoff,
    Landing,
}

/// 実行中の滑走路操作（排他ロック）
#[derive(Debug, Clone, PartialEq)]
pub struct RunwayOperation {
    pub unit_id: String,
    pub operation_type: RunwayOperationType,
}

/// 駐機スロット（生成後は不変）
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingSlot {
    pub index: usize,
    pub position: WorldPoint,
    pub tile: TilePos,
    pub facing: f64,
}

/// 滑走路上の基準点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunwayPoint {
    pub position: WorldPoint,
    pub tile: TilePos,
    pub facing: f64,
}

/// 滑走路ジオメトリ（開始点 → 離陸点 → 出口の順に+x方向）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunwayGeometry {
    pub start: RunwayPoint,
    pub liftoff: RunwayPoint,
    pub exit: RunwayPoint,
}

/// 飛行場のタイル上の占有範囲
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirfieldFootprint {
    pub tile_x: i32,
    pub tile_y: i32,
    pub width: i32,
    pub height: i32,
}

impl AirfieldFootprint {
    /// 正規化テンプレート座標をワールド座標へ変換
    fn template_to_world(&self, template: (f64, f64), tile_size: f64) -> WorldPoint {
        let origin_x = self.tile_x as f64 * tile_size;
        let origin_y = self.tile_y as f64 * tile_size;
        WorldPoint::new(
            origin_x + (template.0 / TEMPLATE_WIDTH) * self.width as f64 * tile_size,
            origin_y + (template.1 / TEMPLATE_HEIGHT) * self.height as f64 * tile_size,
        )
    }

    /// タイルが占有範囲内か
    pub fn contains_tile(&self, tile: TilePos) -> bool {
        tile.x >= self.tile_x && tile.x < self.tile_x + self.width &&
        tile.y >= self.tile_y && tile.y < self.tile_y + self.height
    }

    /// 占有範囲の中心（ワールド座標）
    pub fn center(&self, tile_size: f64) -> WorldPoint {
        WorldPoint::new(
            (self.tile_x as f64 + self.width as f64 / 2.0) * tile_size,
            (self.tile_y as f64 + self.height as f64 / 2.0) * tile_size,
        )
    }

    /// 格納庫ブロックに含まれるローカルタイルか（地上走行不可）
    pub fn is_blocked_local_tile(&self, local_x: i32, local_y: i32) -> bool {
        if self.width <= 0 || self.height <= 0 {
            return true;
        }
        let px = ((local_x as f64 + 0.5) / self.width as f64) * TEMPLATE_WIDTH;
        let py = ((local_y as f64 + 0.5) / self.height as f64) * TEMPLATE_HEIGHT;
        let (x_min, x_max, y_min, y_max) = HANGAR_BLOCK_TEMPLATE;
        px >= x_min && px <= x_max && py >= y_min && py <= y_max
    }
}

/// 飛行場
///
/// スロット・滑走路ジオメトリ・キューを排他的に所有します。
/// フィールドは非公開で、変更は `AirfieldManager` 経由でのみ行われます。
#[derive(Debug, Clone)]
pub struct Airfield {
    pub id: String,
    pub owner: String,
    pub footprint: AirfieldFootprint,
    pub health: f64,
    tile_size: f64,
    slots: Vec<ParkingSlot>,
    runway: Option<RunwayGeometry>,
    occupancy: Vec<Option<String>>,
    takeoff_queue: VecDeque<String>,
    landing_queue: VecDeque<String>,
    operation: Option<RunwayOperation>,
    landed_unit_id: Option<String>,
}

impl Airfield {
    /// 新しい飛行場を作成（スロット等は `ensure_initialized` で生成）
    pub fn new(id: String, owner: String, footprint: AirfieldFootprint, health: f64, tile_size: f64) -> Self {
        Self {
            id,
            owner,
            footprint,
            health,
            tile_size,
            slots: Vec::new(),
            runway: None,
            occupancy: Vec::new(),
            takeoff_queue: VecDeque::new(),
            landing_queue: VecDeque::new(),
            operation: None,
            landed_unit_id: None,
        }
    }

    pub fn slots(&self) -> &[ParkingSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&ParkingSlot> {
        self.slots.get(index)
    }

    pub fn runway(&self) -> Option<&RunwayGeometry> {
        self.runway.as_ref()
    }

    pub fn occupancy(&self) -> &[Option<String>] {
        &self.occupancy
    }

    /// スロットの占有機ID
    pub fn slot_occupant(&self, index: usize) -> Option<&str> {
        self.occupancy.get(index).and_then(|o| o.as_deref())
    }

    /// 機体が占有しているスロット（値による走査）
    pub fn slot_of(&self, unit_id: &str) -> Option<usize> {
        self.occupancy.iter().position(|o| o.as_deref() == Some(unit_id))
    }

    pub fn has_free_slot(&self) -> bool {
        self.occupancy.iter().any(|o| o.is_none())
    }

    pub fn operation(&self) -> Option<&RunwayOperation> {
        self.operation.as_ref()
    }

    pub fn queue(&self, operation_type: RunwayOperationType) -> &VecDeque<String> {
        match operation_type {
            RunwayOperationType::Takeoff => &self.takeoff_queue,
            RunwayOperationType::Landing => &self.landing_queue,
        }
    }

    /// キュー内の順位（0が先頭）
    pub fn queue_position(&self, unit_id: &str, operation_type: RunwayOperationType) -> Option<usize> {
        self.queue(operation_type).iter().position(|id| id == unit_id)
    }

    pub fn landed_unit_id(&self) -> Option<&str> {
        self.landed_unit_id.as_deref()
    }

    pub fn center(&self) -> WorldPoint {
        self.footprint.center(self.tile_size)
    }

    // ---- 以下は AirfieldManager からのみ呼ばれる変更操作 ----

    fn ensure_initialized(&mut self) {
        if self.slots.is_empty() {
            let tile_size = self.tile_size;
            self.slots = PARKING_TEMPLATE
                .iter()
                .enumerate()
                .map(|(index, template)| {
                    let position = self.footprint.template_to_world(*template, tile_size);
                    ParkingSlot {
                        index,
                        position,
                        tile: TilePos::from_world(&position, tile_size),
                        facing: PARKED_FACING,
                    }
                })
                .collect();
        }

        if self.runway.is_none() {
            let point = |template: (f64, f64)| {
                let position = self.footprint.template_to_world(template, self.tile_size);
                RunwayPoint {
                    position,
                    tile: TilePos::from_world(&position, self.tile_size),
                    facing: 0.0,
                }
            };
            self.runway = Some(RunwayGeometry {
                start: point(RUNWAY_START_TEMPLATE),
                liftoff: point(RUNWAY_LIFTOFF_TEMPLATE),
                exit: point(RUNWAY_EXIT_TEMPLATE),
            });
        }

        if self.occupancy.len() != self.slots.len() {
            self.occupancy = vec![None; self.slots.len()];
        }
    }

    fn claim_parking_slot(&mut self, preferred_index: Option<usize>) -> Option<usize> {
        self.ensure_initialized();
        if let Some(index) = preferred_index {
            if index < self.occupancy.len() && self.occupancy[index].is_none() {
                return Some(index);
            }
        }
        self.occupancy.iter().position(|o| o.is_none())
    }

    fn set_slot_occupant(&mut self, slot_index: usize, unit_id: Option<&str>) {
        self.ensure_initialized();
        if slot_index >= self.occupancy.len() {
            return;
        }
        // 1機が占有するスロットは高々1つ
        if let Some(unit_id) = unit_id {
            self.clear_slot_occupant(unit_id);
        }
        self.occupancy[slot_index] = unit_id.map(str::to_string);
    }

    fn clear_slot_occupant(&mut self, unit_id: &str) {
        self.ensure_initialized();
        for entry in self.occupancy.iter_mut() {
            if entry.as_deref() == Some(unit_id) {
                *entry = None;
            }
        }
    }

    fn queue_mut(&mut self, operation_type: RunwayOperationType) -> &mut VecDeque<String> {
        match operation_type {
            RunwayOperationType::Takeoff => &mut self.takeoff_queue,
            RunwayOperationType::Landing => &mut self.landing_queue,
        }
    }

    fn enqueue_operation(&mut self, unit_id: &str, operation_type: RunwayOperationType) {
        let queue = self.queue_mut(operation_type);
        if !queue.iter().any(|id| id == unit_id) {
            queue.push_back(unit_id.to_string());
        }
    }

    fn try_claim_operation(&mut self, unit_id: &str, operation_type: RunwayOperationType) -> bool {
        self.enqueue_operation(unit_id, operation_type);

        if let Some(operation) = &self.operation {
            return operation.unit_id == unit_id;
        }

        if self.queue(operation_type).front().map(String::as_str) != Some(unit_id) {
            return false;
        }

        self.operation = Some(RunwayOperation {
            unit_id: unit_id.to_string(),
            operation_type,
        });
        true
    }

    fn remove_queue_entry(&mut self, unit_id: &str, operation_type: Option<RunwayOperationType>) {
        if operation_type.is_none() || operation_type == Some(RunwayOperationType::Takeoff) {
            self.takeoff_queue.retain(|id| id != unit_id);
        }
        if operation_type.is_none() || operation_type == Some(RunwayOperationType::Landing) {
            self.landing_queue.retain(|id| id != unit_id);
        }
    }

    fn release_operation(&mut self, unit_id: &str) -> bool {
        let released = self.operation.as_ref().is_some_and(|op| op.unit_id == unit_id);
        if released {
            self.operation = None;
        }
        self.remove_queue_entry(unit_id, None);
        released
    }
}

impl IAgent for Airfield {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.health > 0.0
    }
}

/// 飛行場資源マネージャー
///
/// 全飛行場の共有状態を所有し、スロット・キュー・滑走路ロックへの
/// 変更を一元的に提供します。存在しない飛行場IDに対する操作は何もしません。
#[derive(Debug, Default)]
pub struct AirfieldManager {
    airfields: Vec<Airfield>,
}

impl AirfieldManager {
    pub fn new() -> Self {
        Self { airfields: Vec::new() }
    }

    /// 飛行場を登録して初期化
    pub fn add_airfield(&mut self, mut airfield: Airfield) {
        airfield.ensure_initialized();
        self.airfields.retain(|a| a.id != airfield.id);
        self.airfields.push(airfield);
    }

    pub fn get(&self, airfield_id: &str) -> Option<&Airfield> {
        self.airfields.iter().find(|a| a.id == airfield_id && a.is_active())
    }

    pub fn airfields(&self) -> impl Iterator<Item = &Airfield> {
        self.airfields.iter()
    }

    fn get_mut(&mut self, airfield_id: &str) -> Option<&mut Airfield> {
        self.airfields.iter_mut().find(|a| a.id == airfield_id && a.health > 0.0)
    }

    /// 冪等な初期化（毎ティック呼び出してよい）
    pub fn ensure_initialized(&mut self, airfield_id: &str) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.ensure_initialized();
        }
    }

    /// 駐機スロットを確保（希望スロットが空いていればそれ、なければ最小の空き番号）
    ///
    /// 占有表は変更しません。空きがなければ `None`（呼び出し側で再試行）。
    pub fn claim_parking_slot(&mut self, airfield_id: &str, preferred_index: Option<usize>) -> Option<usize> {
        self.get_mut(airfield_id)?.claim_parking_slot(preferred_index)
    }

    pub fn set_slot_occupant(&mut self, airfield_id: &str, slot_index: usize, unit_id: &str) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.set_slot_occupant(slot_index, Some(unit_id));
        }
    }

    /// 機体IDでスロット表を走査して占有を解除（保存済みインデックスは信用しない）
    pub fn clear_slot_occupant(&mut self, airfield_id: &str, unit_id: &str) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.clear_slot_occupant(unit_id);
        }
    }

    pub fn enqueue_operation(&mut self, airfield_id: &str, unit_id: &str, operation_type: RunwayOperationType) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.ensure_initialized();
            airfield.enqueue_operation(unit_id, operation_type);
        }
    }

    /// 滑走路使用権の取得を試みる
    ///
    /// 実行中の操作がない（または既に自機のもの）かつ自機がキュー先頭の場合のみ
    /// 許可します。許可されなかった場合は `false` を返すだけで、次ティックで再試行します。
    pub fn try_claim_operation(&mut self, airfield_id: &str, unit_id: &str, operation_type: RunwayOperationType) -> bool {
        let Some(airfield) = self.get_mut(airfield_id) else {
            return false;
        };
        airfield.ensure_initialized();
        let already_held = airfield.operation.as_ref().is_some_and(|op| op.unit_id == unit_id);
        let granted = airfield.try_claim_operation(unit_id, operation_type);
        if granted && !already_held {
            info!(
                airfield_id = %airfield_id,
                unit_id = %unit_id,
                operation = ?operation_type,
                "RUNWAY_GRANTED: 滑走路の使用が許可されました"
            );
        }
        granted
    }

    /// 滑走路操作を解放し、両キューから機体を除去
    pub fn release_operation(&mut self, airfield_id: &str, unit_id: &str) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            if airfield.release_operation(unit_id) {
                debug!(
                    airfield_id = %airfield_id,
                    unit_id = %unit_id,
                    "RUNWAY_RELEASED: 滑走路が解放されました"
                );
            }
        }
    }

    /// 放棄された意図のキューエントリを除去（`None` なら両キュー）
    pub fn remove_queue_entry(&mut self, airfield_id: &str, unit_id: &str, operation_type: Option<RunwayOperationType>) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.remove_queue_entry(unit_id, operation_type);
        }
    }

    /// 着陸済み機体の参照を設定
    pub fn set_landed_unit(&mut self, airfield_id: &str, unit_id: Option<&str>) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.landed_unit_id = unit_id.map(str::to_string);
        }
    }

    /// 機体に関する全ての参照（操作・キュー・スロット・着陸参照）を解除
    ///
    /// 撃破や再バインドの際に呼ばれる冪等な修復操作です。
    pub fn release_unit(&mut self, airfield_id: &str, unit_id: &str) {
        if let Some(airfield) = self.get_mut(airfield_id) {
            airfield.release_operation(unit_id);
            airfield.clear_slot_occupant(unit_id);
            if airfield.landed_unit_id.as_deref() == Some(unit_id) {
                airfield.landed_unit_id = None;
            }
        }
    }

    /// 存在しない機体を参照している操作・キュー・スロットを除去
    ///
    /// # 戻り値
    ///
    /// 除去したエントリ数
    pub fn purge_stale(&mut self, live_unit_ids: &HashSet<String>) -> usize {
        let mut purged = 0;
        for airfield in self.airfields.iter_mut() {
            if let Some(operation) = &airfield.operation {
                if !live_unit_ids.contains(&operation.unit_id) {
                    warn!(
                        airfield_id = %airfield.id,
                        unit_id = %operation.unit_id,
                        operation = ?operation.operation_type,
                        "RUNWAY_STALE_PURGED: 存在しない機体の滑走路ロックを解除しました"
                    );
                    airfield.operation = None;
                    purged += 1;
                }
            }

            for queue in [&mut airfield.takeoff_queue, &mut airfield.landing_queue] {
                let before = queue.len();
                queue.retain(|id| live_unit_ids.contains(id));
                purged += before - queue.len();
            }

            for entry in airfield.occupancy.iter_mut() {
                if entry.as_ref().is_some_and(|id| !live_unit_ids.contains(id)) {
                    *entry = None;
                    purged += 1;
                }
            }

            if airfield.landed_unit_id.as_ref().is_some_and(|id| !live_unit_ids.contains(id)) {
                airfield.landed_unit_id = None;
            }
        }
        purged
    }

    /// 飛行場へダメージを与え、破壊された場合は除去
    ///
    /// # 戻り値
    ///
    /// 破壊された場合はtrue
    pub fn damage_airfield(&mut self, airfield_id: &str, damage: f64) -> bool {
        let destroyed = match self.get_mut(airfield_id) {
            Some(airfield) => {
                airfield.health = (airfield.health - damage).max(0.0);
                airfield.health <= 0.0
            }
            None => false,
        };
        if destroyed {
            self.destroy_airfield(airfield_id);
        }
        destroyed
    }

    /// 飛行場を除去（所有するスロット・キュー・ロックも同時に消滅）
    pub fn destroy_airfield(&mut self, airfield_id: &str) -> Option<Airfield> {
        let index = self.airfields.iter().position(|a| a.id == airfield_id)?;
        let airfield = self.airfields.remove(index);
        info!(
            airfield_id = %airfield.id,
            owner = %airfield.owner,
            queued_takeoffs = airfield.takeoff_queue.len(),
            queued_landings = airfield.landing_queue.len(),
            "AIRFIELD_DESTROYED: 飛行場が破壊されました"
        );
        Some(airfield)
    }

    /// 再バインド先の候補（最寄りの健在な味方飛行場で空きスロットがあるもの）
    pub fn find_rebind_candidate(&self, owner: &str, from: WorldPoint, unit_id: &str) -> Option<String> {
        self.airfields
            .iter()
            .filter(|a| a.is_active() && a.owner == owner)
            .filter(|a| a.has_free_slot() || a.slot_of(unit_id).is_some())
            .min_by(|a, b| {
                a.center().distance(&from)
                    .partial_cmp(&b.center().distance(&from))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            })
            .map(|a| a.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn manager_with_airfield() -> AirfieldManager {
        let mut manager = AirfieldManager::new();
        manager.add_airfield(Airfield::new(
            "AF1".to_string(),
            "blue".to_string(),
            AirfieldFootprint { tile_x: 5, tile_y: 5, width: 12, height: 6 },
            1000.0,
            32.0,
        ));
        manager
    }

    fn live(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_geometry_derived_from_footprint() {
        let manager = manager_with_airfield();
        let airfield = manager.get("AF1").unwrap();
        assert_eq!(airfield.slots().len(), 7);
        assert_eq!(airfield.occupancy().len(), airfield.slots().len());

        let runway = airfield.runway().unwrap();
        assert_relative_eq!(runway.start.position.x, 160.0 + 15.0);
        assert_relative_eq!(runway.exit.position.x, 160.0 + 384.0);
        assert_relative_eq!(runway.start.position.y, 160.0 + 90.0);
        assert!(runway.start.position.x < runway.liftoff.position.x);
        assert!(runway.liftoff.position.x < runway.exit.position.x);
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let mut manager = manager_with_airfield();
        manager.set_slot_occupant("AF1", 2, "F1");
        manager.ensure_initialized("AF1");
        manager.ensure_initialized("AF1");
        let airfield = manager.get("AF1").unwrap();
        assert_eq!(airfield.slot_occupant(2), Some("F1"));
        assert_eq!(airfield.slots().len(), 7);
    }

    #[test]
    fn test_claim_parking_slot_prefers_requested_then_lowest_free() {
        let mut manager = manager_with_airfield();
        assert_eq!(manager.claim_parking_slot("AF1", Some(3)), Some(3));
        manager.set_slot_occupant("AF1", 3, "F1");
        manager.set_slot_occupant("AF1", 0, "F2");
        assert_eq!(manager.claim_parking_slot("AF1", Some(3)), Some(1));
        assert_eq!(manager.claim_parking_slot("AF1", None), Some(1));
        assert_eq!(manager.claim_parking_slot("AF1", Some(99)), Some(1));
    }

    #[test]
    fn test_claim_parking_slot_none_when_full() {
        let mut manager = manager_with_airfield();
        for index in 0..7 {
            manager.set_slot_occupant("AF1", index, &format!("F{}", index));
        }
        assert_eq!(manager.claim_parking_slot("AF1", None), None);

        // 解放されたスロットは再び確保できる
        manager.clear_slot_occupant("AF1", "F4");
        assert_eq!(manager.claim_parking_slot("AF1", None), Some(4));
    }

    #[test]
    fn test_unit_occupies_at_most_one_slot() {
        let mut manager = manager_with_airfield();
        manager.set_slot_occupant("AF1", 1, "F1");
        manager.set_slot_occupant("AF1", 4, "F1");
        let airfield = manager.get("AF1").unwrap();
        let held = airfield.occupancy().iter().filter(|o| o.as_deref() == Some("F1")).count();
        assert_eq!(held, 1);
        assert_eq!(airfield.slot_of("F1"), Some(4));
    }

    #[test]
    fn test_clear_slot_occupant_scans_by_value() {
        let mut manager = manager_with_airfield();
        manager.set_slot_occupant("AF1", 5, "F1");
        manager.clear_slot_occupant("AF1", "F1");
        assert_eq!(manager.get("AF1").unwrap().slot_of("F1"), None);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut manager = manager_with_airfield();
        manager.enqueue_operation("AF1", "F1", RunwayOperationType::Takeoff);
        manager.enqueue_operation("AF1", "F1", RunwayOperationType::Takeoff);
        manager.enqueue_operation("AF1", "F2", RunwayOperationType::Takeoff);
        let queue: Vec<_> = manager.get("AF1").unwrap().queue(RunwayOperationType::Takeoff).iter().cloned().collect();
        assert_eq!(queue, vec!["F1".to_string(), "F2".to_string()]);
    }

    #[test]
    fn test_runway_granted_only_to_queue_head() {
        let mut manager = manager_with_airfield();
        manager.enqueue_operation("AF1", "F1", RunwayOperationType::Takeoff);
        manager.enqueue_operation("AF1", "F2", RunwayOperationType::Takeoff);

        assert!(!manager.try_claim_operation("AF1", "F2", RunwayOperationType::Takeoff));
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Takeoff));
        // 保持者による再ポーリングは許可され続ける
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Takeoff));
        assert!(!manager.try_claim_operation("AF1", "F2", RunwayOperationType::Takeoff));

        manager.release_operation("AF1", "F1");
        assert!(manager.get("AF1").unwrap().operation().is_none());
        assert!(manager.try_claim_operation("AF1", "F2", RunwayOperationType::Takeoff));
    }

    #[test]
    fn test_at_most_one_operation_across_queues() {
        let mut manager = manager_with_airfield();
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Landing));
        assert!(!manager.try_claim_operation("AF1", "F2", RunwayOperationType::Takeoff));
        let operation = manager.get("AF1").unwrap().operation().cloned().unwrap();
        assert_eq!(operation.unit_id, "F1");
        assert_eq!(operation.operation_type, RunwayOperationType::Landing);
    }

    #[test]
    fn test_release_by_non_holder_only_dequeues() {
        let mut manager = manager_with_airfield();
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Takeoff));
        manager.enqueue_operation("AF1", "F2", RunwayOperationType::Landing);
        manager.release_operation("AF1", "F2");
        let airfield = manager.get("AF1").unwrap();
        assert_eq!(airfield.operation().map(|op| op.unit_id.as_str()), Some("F1"));
        assert_eq!(airfield.queue_position("F2", RunwayOperationType::Landing), None);
    }

    #[test]
    fn test_remove_queue_entry_by_type() {
        let mut manager = manager_with_airfield();
        manager.enqueue_operation("AF1", "F1", RunwayOperationType::Takeoff);
        manager.enqueue_operation("AF1", "F1", RunwayOperationType::Landing);
        manager.remove_queue_entry("AF1", "F1", Some(RunwayOperationType::Landing));
        let airfield = manager.get("AF1").unwrap();
        assert_eq!(airfield.queue_position("F1", RunwayOperationType::Takeoff), Some(0));
        assert_eq!(airfield.queue_position("F1", RunwayOperationType::Landing), None);
    }

    #[test]
    fn test_purge_stale_unblocks_real_unit() {
        let mut manager = manager_with_airfield();
        assert!(manager.try_claim_operation("AF1", "ghost", RunwayOperationType::Landing));
        manager.enqueue_operation("AF1", "ghost", RunwayOperationType::Takeoff);
        manager.set_slot_occupant("AF1", 0, "ghost");
        assert!(!manager.try_claim_operation("AF1", "F1", RunwayOperationType::Landing));

        let purged = manager.purge_stale(&live(&["F1"]));
        assert!(purged >= 3);
        assert_eq!(manager.get("AF1").unwrap().slot_occupant(0), None);
        // ゴーストが消えたのでF1が先頭になり許可される
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Landing));
    }

    #[test]
    fn test_release_unit_is_idempotent_repair() {
        let mut manager = manager_with_airfield();
        assert!(manager.try_claim_operation("AF1", "F1", RunwayOperationType::Takeoff));
        manager.set_slot_occupant("AF1", 1, "F1");
        manager.set_landed_unit("AF1", Some("F1"));
        manager.release_unit("AF1", "F1");
        manager.release_unit("AF1", "F1");
        let airfield = manager.get("AF1").unwrap();
        assert!(airfield.operation().is_none());
        assert_eq!(airfield.slot_of("F1"), None);
        assert_eq!(airfield.landed_unit_id(), None);
    }

    #[test]
    fn test_unknown_airfield_is_guarded_noop() {
        let mut manager = manager_with_airfield();
        assert!(!manager.try_claim_operation("nope", "F1", RunwayOperationType::Takeoff));
        assert_eq!(manager.claim_parking_slot("nope", None), None);
        manager.release_operation("nope", "F1");
        manager.set_slot_occupant("nope", 0, "F1");
        assert!(manager.get("nope").is_none());
    }

    #[test]
    fn test_destroyed_airfield_no_longer_resolves() {
        let mut manager = manager_with_airfield();
        assert!(!manager.damage_airfield("AF1", 400.0));
        assert!(manager.damage_airfield("AF1", 700.0));
        assert!(manager.get("AF1").is_none());
        assert_eq!(manager.find_rebind_candidate("blue", WorldPoint::new(0.0, 0.0), "F1"), None);
    }

    #[test]
    fn test_rebind_candidate_nearest_friendly_with_free_slot() {
        let mut manager = manager_with_airfield();
        manager.add_airfield(Airfield::new(
            "AF2".to_string(),
            "blue".to_string(),
            AirfieldFootprint { tile_x: 40, tile_y: 5, width: 12, height: 6 },
            1000.0,
            32.0,
        ));
        manager.add_airfield(Airfield::new(
            "RED".to_string(),
            "red".to_string(),
            AirfieldFootprint { tile_x: 60, tile_y: 5, width: 12, height: 6 },
            1000.0,
            32.0,
        ));
        let near_af2 = WorldPoint::new(45.0 * 32.0, 8.0 * 32.0);
        assert_eq!(manager.find_rebind_candidate("blue", near_af2, "F1").as_deref(), Some("AF2"));

        for index in 0..7 {
            manager.set_slot_occupant("AF2", index, &format!("X{}", index));
        }
        assert_eq!(manager.find_rebind_candidate("blue", near_af2, "F1").as_deref(), Some("AF1"));
    }

    #[test]
    fn test_hangar_block_tiles() {
        let footprint = AirfieldFootprint { tile_x: 0, tile_y: 0, width: 12, height: 6 };
        assert!(footprint.is_blocked_local_tile(0, 0));
        // 滑走路開始タイルと駐機列は通行可能
        assert!(!footprint.is_blocked_local_tile(0, 2));
        assert!(!footprint.is_blocked_local_tile(3, 4));
        assert!(!footprint.is_blocked_local_tile(10, 0));
    }
}
