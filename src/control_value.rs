// src/control_value.rs
//
// Shared, smoothed control parameters. Registered by name from node init
// with a reference count, so multiple graph instances built from the same
// definition share one value. The owner ticks the set once per block and
// exports the smoothed values into each instance's named float memory
// (`Graph::import_control_values`).

/// How a control value is initialized and how many dimensions it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlValueKind {
    /// One dimension, desired starts at the default.
    Vector1,
    /// Two dimensions, desired starts at the defaults.
    Vector2,
    /// One dimension, desired starts at a uniform draw from [min, max].
    Random1,
    /// Two dimensions, both drawn from [min, max].
    Random2,
}

impl ControlValueKind {
    pub fn dimensions(self) -> usize {
        match self {
            ControlValueKind::Vector1 | ControlValueKind::Random1 => 1,
            ControlValueKind::Vector2 | ControlValueKind::Random2 => 2,
        }
    }

    fn is_random(self) -> bool {
        matches!(self, ControlValueKind::Random1 | ControlValueKind::Random2)
    }
}

#[derive(Debug, Clone)]
pub struct ControlValue {
    pub name: String,
    pub kind: ControlValueKind,
    pub min: f32,
    pub max: f32,
    /// Per-second retention factor base; 0 snaps immediately, values close
    /// to 1 glide slowly.
    pub smoothness: f32,
    pub default_x: f32,
    pub default_y: f32,
    pub desired_x: f32,
    pub desired_y: f32,
    pub current_x: f32,
    pub current_y: f32,
    ref_count: u32,
}

impl ControlValue {
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// The registry of active control values, kept sorted by name so UI
/// enumeration and memf export run in a stable order.
#[derive(Debug, Default)]
pub struct ControlValues {
    values: Vec<ControlValue>,
}

impl ControlValues {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }

    /// Register a control value, or bump the reference count of an existing
    /// one with the same name. The first registration wins the parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        kind: ControlValueKind,
        name: &str,
        min: f32,
        max: f32,
        smoothness: f32,
        default_x: f32,
        default_y: f32,
    ) {
        if let Some(pos) = self.position(name) {
            self.values[pos].ref_count += 1;
            return;
        }

        let (desired_x, desired_y) = if kind.is_random() {
            let draw = || min + fastrand::f32() * (max - min);
            (draw(), if kind.dimensions() == 2 { draw() } else { default_y })
        } else {
            (default_x, default_y)
        };

        self.values.push(ControlValue {
            name: name.to_owned(),
            kind,
            min,
            max,
            smoothness,
            default_x,
            default_y,
            desired_x,
            desired_y,
            current_x: desired_x,
            current_y: desired_y,
            ref_count: 1,
        });
        self.values.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Drop one reference; the value disappears when the last holder leaves.
    pub fn unregister(&mut self, name: &str) {
        let Some(pos) = self.position(name) else {
            log::warn!("unregister of unknown control value '{name}'");
            return;
        };

        self.values[pos].ref_count -= 1;
        if self.values[pos].ref_count == 0 {
            self.values.remove(pos);
        }
    }

    pub fn set_desired(&mut self, name: &str, x: f32, y: f32) {
        if let Some(pos) = self.position(name) {
            let v = &mut self.values[pos];
            v.desired_x = x.clamp(v.min, v.max);
            v.desired_y = y.clamp(v.min, v.max);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ControlValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Advance every value toward its desired target. The retained fraction
    /// is `smoothness^dt`, so the glide rate is frame-rate independent.
    pub fn tick(&mut self, dt: f32) {
        for v in &mut self.values {
            let retain = v.smoothness.powf(dt);
            v.current_x = v.current_x * retain + v.desired_x * (1.0 - retain);
            v.current_y = v.current_y * retain + v.desired_y * (1.0 - retain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_default(cv: &mut ControlValues, name: &str, smoothness: f32) {
        cv.register(ControlValueKind::Vector1, name, 0.0, 1.0, smoothness, 0.0, 0.0);
    }

    #[test]
    fn register_is_ref_counted() {
        let mut cv = ControlValues::new();
        register_default(&mut cv, "gain", 0.5);
        register_default(&mut cv, "gain", 0.5);
        register_default(&mut cv, "gain", 0.5);
        assert_eq!(cv.len(), 1);
        assert_eq!(cv.get("gain").unwrap().ref_count(), 3);

        cv.unregister("gain");
        cv.unregister("gain");
        assert_eq!(cv.len(), 1);
        cv.unregister("gain");
        assert!(cv.is_empty());

        // extra unregister is logged and ignored
        cv.unregister("gain");
    }

    #[test]
    fn values_are_sorted_by_name() {
        let mut cv = ControlValues::new();
        register_default(&mut cv, "zeta", 0.0);
        register_default(&mut cv, "alpha", 0.0);
        register_default(&mut cv, "mid", 0.0);

        let names: Vec<&str> = cv.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn zero_smoothness_snaps_in_one_tick() {
        let mut cv = ControlValues::new();
        register_default(&mut cv, "gain", 0.0);
        cv.set_desired("gain", 1.0, 0.0);

        cv.tick(1.0 / 60.0);
        assert_eq!(cv.get("gain").unwrap().current_x, 1.0);
    }

    #[test]
    fn smoothing_approaches_desired_monotonically() {
        let mut cv = ControlValues::new();
        register_default(&mut cv, "gain", 0.9);
        cv.set_desired("gain", 1.0, 0.0);

        let dt = 1.0f32 / 60.0;
        let mut prev = 0.0;
        for _ in 0..100 {
            cv.tick(dt);
            let x = cv.get("gain").unwrap().current_x;
            assert!(x > prev);
            assert!(x <= 1.0);
            prev = x;
        }

        // retain = smoothness^dt per tick, so after n ticks the value sits
        // at 1 - smoothness^(n*dt)
        let expected = 1.0 - 0.9f32.powf(100.0 * dt);
        assert!((prev - expected).abs() < 1e-3, "got {prev}, expected {expected}");
    }

    #[test]
    fn set_desired_clamps_to_range() {
        let mut cv = ControlValues::new();
        cv.register(ControlValueKind::Vector1, "pan", -1.0, 1.0, 0.0, 0.0, 0.0);
        cv.set_desired("pan", 5.0, 0.0);
        assert_eq!(cv.get("pan").unwrap().desired_x, 1.0);
    }

    #[test]
    fn random_kind_draws_initial_desired_in_range() {
        let mut cv = ControlValues::new();
        cv.register(ControlValueKind::Random1, "seed", 2.0, 3.0, 0.0, 0.0, 0.0);
        let v = cv.get("seed").unwrap();
        assert!(v.desired_x >= 2.0 && v.desired_x <= 3.0);
        assert_eq!(v.current_x, v.desired_x);
    }
}
