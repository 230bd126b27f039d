use std::ops::{Add, Sub, Mul};
use serde::{Deserialize, Serialize};

/// ワールド座標上の2次元位置
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct WorldPoint {
    pub x: f64, // world units
    pub y: f64, // world units
}

impl WorldPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 2点間の距離
    pub fn distance(&self, other: &WorldPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// 自分から見た相手の方位角（ラジアン）
    pub fn bearing_to(&self, other: &WorldPoint) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// 指定方位へ距離分だけ移動した点
    pub fn offset(&self, angle: f64, distance: f64) -> WorldPoint {
        WorldPoint::new(self.x + angle.cos() * distance, self.y + angle.sin() * distance)
    }

    /// 速度を時間積分した位置
    pub fn advance(&self, velocity: Velocity2D, dt: f64) -> WorldPoint {
        WorldPoint::new(self.x + velocity.x * dt, self.y + velocity.y * dt)
    }
}

impl Add for WorldPoint {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for WorldPoint {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

/// 2次元速度
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity2D {
    pub x: f64, // world units/s
    pub y: f64, // world units/s
}

impl Velocity2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// 速度ベクトルの大きさ
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// 進行方向（ラジアン）
    pub fn heading(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// 方位と速さから速度を生成
    pub fn from_heading(angle: f64, speed: f64) -> Self {
        Self::new(angle.cos() * speed, angle.sin() * speed)
    }

    /// 速度制限（最大速度でクリップ）
    pub fn clamp_magnitude(&self, max_speed: f64) -> Self {
        let mag = self.magnitude();
        if mag > max_speed && mag > 0.0 {
            let factor = max_speed / mag;
            Self::new(self.x * factor, self.y * factor)
        } else {
            *self
        }
    }

    /// 目標速度へ最大変化量 `max_delta` だけ近づける
    pub fn move_towards(&self, desired: Velocity2D, max_delta: f64) -> Self {
        let dx = desired.x - self.x;
        let dy = desired.y - self.y;
        let gap = dx.hypot(dy);
        if gap <= max_delta || gap <= f64::EPSILON {
            desired
        } else {
            let factor = max_delta / gap;
            Self::new(self.x + dx * factor, self.y + dy * factor)
        }
    }
}

impl Add for Velocity2D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Mul<f64> for Velocity2D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

/// タイル座標
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// ワールド座標を含むタイル
    pub fn from_world(point: &WorldPoint, tile_size: f64) -> Self {
        Self::new((point.x / tile_size).floor() as i32, (point.y / tile_size).floor() as i32)
    }

    /// タイル中心のワールド座標
    pub fn center(&self, tile_size: f64) -> WorldPoint {
        WorldPoint::new(
            self.x as f64 * tile_size + tile_size / 2.0,
            self.y as f64 * tile_size + tile_size / 2.0,
        )
    }
}

/// 影の描画ヒント（高度のみから求まる）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowHint {
    pub offset: f64,
    pub scale: f64,
}

impl ShadowHint {
    pub fn grounded() -> Self {
        Self { offset: 0.0, scale: 1.0 }
    }

    /// 高度比から影のオフセットと拡大率を計算
    pub fn from_altitude(altitude: f64, max_altitude: f64, tile_size: f64) -> Self {
        if max_altitude <= 0.0 || altitude <= 0.0 {
            return Self::grounded();
        }
        let ratio = (altitude / max_altitude).min(1.0);
        Self {
            offset: ratio * tile_size * 1.8,
            scale: 1.0 + ratio * 0.5,
        }
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use std::f64::consts::{PI, TAU};

    /// 値を [0, 1] に制限
    pub fn clamp01(t: f64) -> f64 {
        if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) }
    }

    /// `start` から `end` までの進捗率（[0, 1]）
    ///
    /// `end` は最低でも `start + 1` として扱い、ゼロ除算を避けます。
    pub fn progress_between(value: f64, start: f64, end: f64) -> f64 {
        let end = end.max(start + 1.0);
        clamp01((value - start) / (end - start))
    }

    pub fn ease_in_quad(t: f64) -> f64 {
        let t = clamp01(t);
        t * t
    }

    pub fn ease_out_quad(t: f64) -> f64 {
        let t = clamp01(t);
        t * (2.0 - t)
    }

    pub fn ease_in_sine(t: f64) -> f64 {
        let t = clamp01(t);
        1.0 - (t * PI / 2.0).cos()
    }

    pub fn ease_out_sine(t: f64) -> f64 {
        let t = clamp01(t);
        (t * PI / 2.0).sin()
    }

    /// 角度を (-PI, PI] の範囲に正規化
    pub fn normalize_angle(angle: f64) -> f64 {
        let mut normalized = angle % TAU;
        if normalized > PI {
            normalized -= TAU;
        } else if normalized <= -PI {
            normalized += TAU;
        }
        normalized
    }

    /// 2つの角度の差（from → to、(-PI, PI]）
    pub fn angle_difference(from: f64, to: f64) -> f64 {
        normalize_angle(to - from)
    }

    /// 現在角から目標角へ最大 `max_step` だけ回転
    pub fn smooth_rotate_towards(current: f64, desired: f64, max_step: f64) -> f64 {
        let diff = angle_difference(current, desired);
        if diff.abs() <= max_step {
            normalize_angle(desired)
        } else {
            normalize_angle(current + diff.signum() * max_step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::math_utils::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_easing_curves_hit_endpoints_and_clamp() {
        for ease in [ease_in_quad, ease_out_quad, ease_in_sine, ease_out_sine] {
            assert_relative_eq!(ease(0.0), 0.0, epsilon = 1e-12);
            assert_relative_eq!(ease(1.0), 1.0, epsilon = 1e-12);
            assert_relative_eq!(ease(-3.0), 0.0, epsilon = 1e-12);
            assert_relative_eq!(ease(7.0), 1.0, epsilon = 1e-12);
        }
        assert!(ease_out_quad(0.5) > ease_in_quad(0.5));
    }

    #[test]
    fn test_progress_between_degenerate_span() {
        assert_relative_eq!(progress_between(5.0, 0.0, 10.0), 0.5);
        assert_relative_eq!(progress_between(20.0, 0.0, 10.0), 1.0);
        // 区間長0でもNaNにならない
        assert!(progress_between(3.0, 3.0, 3.0).is_finite());
    }

    #[test]
    fn test_smooth_rotate_wraps_shortest_way() {
        let next = smooth_rotate_towards(PI - 0.1, -PI + 0.1, 0.05);
        assert_relative_eq!(next, PI - 0.05, epsilon = 1e-9);
        let reached = smooth_rotate_towards(0.0, 0.1, 0.5);
        assert_relative_eq!(reached, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_velocity_move_towards_respects_limit() {
        let v = Velocity2D::zero().move_towards(Velocity2D::new(10.0, 0.0), 4.0);
        assert_relative_eq!(v.x, 4.0);
        let v = v.move_towards(Velocity2D::new(10.0, 0.0), 100.0);
        assert_relative_eq!(v.x, 10.0);
    }

    #[test]
    fn test_tile_roundtrip_center() {
        let tile = TilePos::from_world(&WorldPoint::new(70.0, 33.0), 32.0);
        assert_eq!(tile, TilePos::new(2, 1));
        assert_eq!(tile.center(32.0), WorldPoint::new(80.0, 48.0));
    }

    #[test]
    fn test_shadow_hint_is_function_of_altitude() {
        assert_eq!(ShadowHint::from_altitude(0.0, 100.0, 32.0), ShadowHint::grounded());
        let full = ShadowHint::from_altitude(100.0, 100.0, 32.0);
        assert_relative_eq!(full.offset, 32.0 * 1.8);
        assert_relative_eq!(full.scale, 1.5);
    }
}
