use crate::models::{
    traits::IAgent,
    common::{WorldPoint, Velocity2D},
    airfield::AirfieldFootprint,
};

/// 空中目標の中心を画面上で持ち上げる係数（高度あたり）
const AIRBORNE_CENTER_LIFT: f64 = 0.4;

/// 敵地上・空中ユニット
///
/// 目的地が指定されていれば等速直線運動で向かい、到達後は停止します。
/// 耐久値を持ち、ロケット攻撃でダメージを受けます。
#[derive(Debug, Clone)]
pub struct HostileUnit {
    pub id: String,
    pub owner: String,
    pub class: String,
    pub position: WorldPoint,
    pub velocity: Velocity2D,
    pub destination: Option<WorldPoint>,
    pub speed: f64,
    pub health: f64,
    pub max_health: f64,
    pub altitude: f64,
}

impl HostileUnit {
    pub fn new(
        id: String,
        owner: String,
        class: String,
        position: WorldPoint,
        destination: Option<WorldPoint>,
        speed: f64,
        health: f64,
        altitude: f64,
    ) -> Self {
        let mut unit = Self {
            id,
            owner,
            class,
            position,
            velocity: Velocity2D::zero(),
            destination,
            speed,
            health,
            max_health: health,
            altitude,
        };
        unit.update_velocity();
        unit
    }

    /// 目的地への速度ベクトルを再計算
    fn update_velocity(&mut self) {
        self.velocity = match self.destination {
            Some(destination) if self.position.distance(&destination) > 0.0 => {
                Velocity2D::from_heading(self.position.bearing_to(&destination), self.speed)
            }
            _ => Velocity2D::zero(),
        };
    }

    /// ダメージを受ける
    ///
    /// # 戻り値
    ///
    /// このダメージで撃破された場合はtrue
    pub fn take_damage(&mut self, damage: f64) -> bool {
        if self.health <= 0.0 {
            return false;
        }
        self.health = (self.health - damage).max(0.0);
        self.health <= 0.0
    }

    /// 移動処理（目的地を越えないよう到達時は停止）
    pub fn move_agent(&mut self, dt: f64) {
        if !self.is_active() {
            return;
        }
        if let Some(destination) = self.destination {
            let remaining = self.position.distance(&destination);
            if remaining <= self.speed * dt {
                self.position = destination;
                self.destination = None;
                self.velocity = Velocity2D::zero();
                return;
            }
        }
        self.position = self.position.advance(self.velocity, dt);
    }
}

impl IAgent for HostileUnit {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.health > 0.0
    }
}

/// 攻撃対象になりうる建造物
#[derive(Debug, Clone)]
pub struct Structure {
    pub id: String,
    pub owner: String,
    pub footprint: AirfieldFootprint,
    pub health: f64,
}

impl Structure {
    pub fn take_damage(&mut self, damage: f64) -> bool {
        if self.health <= 0.0 {
            return false;
        }
        self.health = (self.health - damage).max(0.0);
        self.health <= 0.0
    }
}

impl IAgent for Structure {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.health > 0.0
    }
}

/// 攻撃・追従対象の参照（判別子付き）
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRef {
    /// ユニット（機体・敵ユニット）
    Unit(String),
    /// 建造物（飛行場を含む）
    Structure(String),
    /// 合成された地上点
    Point(WorldPoint),
}

impl TargetRef {
    /// 参照先ID（地上点はなし）
    pub fn id(&self) -> Option<&str> {
        match self {
            TargetRef::Unit(id) | TargetRef::Structure(id) => Some(id),
            TargetRef::Point(_) => None,
        }
    }
}

/// 解決済みの対象スナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub target: TargetRef,
    pub owner: Option<String>,
    pub position: WorldPoint,
    pub altitude: f64,
    pub health: f64,
}

impl TargetSnapshot {
    /// ワールド空間での中心（空中ユニットは高度分持ち上げる）
    pub fn world_center(&self) -> WorldPoint {
        match self.target {
            TargetRef::Unit(_) if self.altitude > 0.0 => {
                WorldPoint::new(self.position.x, self.position.y - self.altitude * AIRBORNE_CENTER_LIFT)
            }
            _ => self.position,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// ティック毎のユニット情報
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    pub id: String,
    pub owner: String,
    pub class: String,
    pub position: WorldPoint,
    pub altitude: f64,
    pub health: f64,
    /// 地上にいる（飛行状態がgrounded）
    pub grounded: bool,
}

/// ティック毎の建造物情報
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSnapshot {
    pub id: String,
    pub owner: String,
    pub center: WorldPoint,
    pub health: f64,
    pub is_airfield: bool,
}

/// ティック開始時点のワールド状態（読み取り専用）
#[derive(Debug, Clone, Default)]
pub struct WorldView {
    pub current_time: f64,
    pub human_player: String,
    pub width: f64,
    pub height: f64,
    pub units: Vec<UnitSnapshot>,
    pub structures: Vec<StructureSnapshot>,
}

impl WorldView {
    pub fn unit(&self, id: &str) -> Option<&UnitSnapshot> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn structure(&self, id: &str) -> Option<&StructureSnapshot> {
        self.structures.iter().find(|s| s.id == id)
    }

    pub fn is_human(&self, owner: &str) -> bool {
        self.human_player == owner
    }

    /// 対象参照を解決（撃破済み・消滅済みなら `None`）
    pub fn resolve(&self, target: &TargetRef) -> Option<TargetSnapshot> {
        let snapshot = match target {
            TargetRef::Unit(id) => self.unit(id).map(|u| TargetSnapshot {
                target: target.clone(),
                owner: Some(u.owner.clone()),
                position: u.position,
                altitude: u.altitude,
                health: u.health,
            }),
            TargetRef::Structure(id) => self.structure(id).map(|s| TargetSnapshot {
                target: target.clone(),
                owner: Some(s.owner.clone()),
                position: s.center,
                altitude: 0.0,
                health: s.health,
            }),
            TargetRef::Point(point) => Some(TargetSnapshot {
                target: target.clone(),
                owner: None,
                position: *point,
                altitude: 0.0,
                health: f64::INFINITY,
            }),
        };
        snapshot.filter(TargetSnapshot::is_alive)
    }

    /// IDから対象参照を作成（ユニット優先）
    pub fn target_ref_for(&self, id: &str) -> Option<TargetRef> {
        if self.unit(id).is_some() {
            Some(TargetRef::Unit(id.to_string()))
        } else if self.structure(id).is_some() {
            Some(TargetRef::Structure(id.to_string()))
        } else {
            None
        }
    }

    /// ワールド境界内に制限した点
    pub fn clamp_point(&self, point: WorldPoint, margin: f64) -> WorldPoint {
        if self.width <= 0.0 || self.height <= 0.0 {
            return point;
        }
        WorldPoint::new(
            point.x.clamp(margin, (self.width - margin).max(margin)),
            point.y.clamp(margin, (self.height - margin).max(margin)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn view() -> WorldView {
        WorldView {
            current_time: 0.0,
            human_player: "blue".to_string(),
            width: 1000.0,
            height: 1000.0,
            units: vec![
                UnitSnapshot {
                    id: "H1".to_string(),
                    owner: "red".to_string(),
                    class: "tank".to_string(),
                    position: WorldPoint::new(100.0, 100.0),
                    altitude: 0.0,
                    health: 50.0,
                    grounded: true,
                },
                UnitSnapshot {
                    id: "H2".to_string(),
                    owner: "red".to_string(),
                    class: "fighter".to_string(),
                    position: WorldPoint::new(200.0, 200.0),
                    altitude: 50.0,
                    health: 0.0,
                    grounded: false,
                },
            ],
            structures: vec![StructureSnapshot {
                id: "S1".to_string(),
                owner: "red".to_string(),
                center: WorldPoint::new(500.0, 500.0),
                health: 300.0,
                is_airfield: false,
            }],
        }
    }

    #[test]
    fn test_hostile_moves_and_stops_at_destination() {
        let mut unit = HostileUnit::new(
            "H1".to_string(), "red".to_string(), "tank".to_string(),
            WorldPoint::new(0.0, 0.0), Some(WorldPoint::new(10.0, 0.0)), 4.0, 10.0, 0.0,
        );
        unit.move_agent(1.0);
        assert_relative_eq!(unit.position.x, 4.0);
        unit.move_agent(1.0);
        unit.move_agent(1.0);
        assert_relative_eq!(unit.position.x, 10.0);
        assert!(unit.destination.is_none());
    }

    #[test]
    fn test_take_damage_reports_kill_once() {
        let mut unit = HostileUnit::new(
            "H1".to_string(), "red".to_string(), "tank".to_string(),
            WorldPoint::new(0.0, 0.0), None, 0.0, 10.0, 0.0,
        );
        assert!(!unit.take_damage(4.0));
        assert!(unit.take_damage(8.0));
        assert!(!unit.take_damage(8.0));
        assert!(!unit.is_active());
    }

    #[test]
    fn test_resolve_filters_dead_and_missing() {
        let view = view();
        assert!(view.resolve(&TargetRef::Unit("H1".to_string())).is_some());
        assert!(view.resolve(&TargetRef::Unit("H2".to_string())).is_none());
        assert!(view.resolve(&TargetRef::Unit("nope".to_string())).is_none());
        assert!(view.resolve(&TargetRef::Point(WorldPoint::new(1.0, 2.0))).is_some());
    }

    #[test]
    fn test_world_center_lifts_airborne_units() {
        let snapshot = TargetSnapshot {
            target: TargetRef::Unit("A".to_string()),
            owner: None,
            position: WorldPoint::new(100.0, 100.0),
            altitude: 50.0,
            health: 1.0,
        };
        assert_relative_eq!(snapshot.world_center().y, 80.0);

        let structure = TargetSnapshot { target: TargetRef::Structure("S".to_string()), ..snapshot };
        assert_relative_eq!(structure.world_center().y, 100.0);
    }

    #[test]
    fn test_target_ref_for_prefers_units() {
        let view = view();
        assert_eq!(view.target_ref_for("H1"), Some(TargetRef::Unit("H1".to_string())));
        assert_eq!(view.target_ref_for("S1"), Some(TargetRef::Structure("S1".to_string())));
        assert_eq!(view.target_ref_for("x"), None);
    }
}
