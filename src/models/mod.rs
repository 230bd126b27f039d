// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントの基本インターフェースと外部サービスのtrait定義
pub mod traits;

// 飛行場の共有資源（駐機スロット・滑走路）
pub mod airfield;

// 攻撃対象とワールド状態のスナップショット
pub mod target;

// 戦闘機と飛行フェーズ
pub mod aircraft;

// 空中の操舵目標の計算
pub mod flight_plan;

// 飛行状態機械
pub mod flight_state;

// 交戦制御
pub mod combat;

// 地上経路探索
pub mod pathfinding;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use airfield::{Airfield, AirfieldFootprint, AirfieldManager, ParkingSlot, RunwayGeometry, RunwayOperation, RunwayOperationType};
pub use target::{HostileUnit, Structure, StructureSnapshot, TargetRef, TargetSnapshot, UnitSnapshot, WorldView};
pub use aircraft::{Aircraft, AssignedDestination, DestinationMode, FlightPhase, FlightPlan, FlightState, PlanMode};
pub use flight_plan::FlightPlanResolver;
pub use flight_state::{FlightContext, update_flight_state};
pub use combat::{CombatContext, ShotRecord, update_combat};
pub use pathfinding::{GridPathFinder, TerrainGrid, TileKind};
