use crate::models::common::*;

/// 全てのシミュレーションエージェントが実装する基本インターフェース
pub trait IAgent {
    /// エージェントIDの取得
    fn get_id(&self) -> String;

    /// エージェントがアクティブかどうか（撃破・破壊されていない）
    fn is_active(&self) -> bool;
}

/// 経路探索で通行を許す地表の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRestriction {
    /// 通行可能な全タイル
    Any,
    /// 舗装面（道路・飛行場）のみ
    PavedOnly,
}

/// 経路探索オプション
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
    /// 目的地タイル自体が通行不可なら代替を探さず空経路を返す
    pub strict_destination: bool,
    /// 指定時、他勢力が所有する舗装面を通行不可とする
    pub owner_filter: Option<String>,
    pub surface: SurfaceRestriction,
}

impl PathOptions {
    /// 地上タキシング用の既定オプション
    pub fn taxi(owner: &str) -> Self {
        Self {
            strict_destination: true,
            owner_filter: Some(owner.to_string()),
            surface: SurfaceRestriction::PavedOnly,
        }
    }
}

/// 地上経路探索サービスのインターフェース
pub trait IPathFinder {
    /// 出発タイルから目的タイルまでの経路（両端を含む）。見つからなければ空
    fn find_path(&self, origin: TilePos, destination: TilePos, options: &PathOptions) -> Vec<TilePos>;

    /// `origin` から最大 `max_radius` タイル以内で条件を満たす最寄りタイル
    fn nearest_surface_tile(&self, origin: TilePos, max_radius: i32, surface: SurfaceRestriction) -> Option<TilePos>;
}

/// プレイヤー通知の出力先
pub trait INotificationSink {
    fn notify(&mut self, message: &str, duration_s: f64);
}

/// 演出（音・エフェクト）のトリガー種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightEffect {
    Takeoff,
    Landing,
    FlightLoop,
}

/// 演出フック（発火のみで結果は返さない）
pub trait IEffectHook {
    fn trigger(&mut self, effect: FlightEffect, unit_id: &str, position: WorldPoint);
}
