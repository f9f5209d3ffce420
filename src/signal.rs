// src/signal.rs
//
// The block signal type: either one scalar valid for an entire audio block,
// or a full per-sample vector of BLOCK_SIZE samples.
//
// Scalars are "expanded" (broadcast into the sample buffer) lazily, and only
// when a per-sample computation is unavoidable. Expansion is a cache fill on
// a logically read-only value, so it is callable through a shared reference.

use std::cell::{Cell, UnsafeCell};
use std::fmt;

/// Number of samples processed per tick. One graph tick advances
/// `BLOCK_SIZE / sample_rate` seconds.
pub const BLOCK_SIZE: usize = 256;

#[repr(align(16))]
struct SampleBlock([f32; BLOCK_SIZE]);

/// A scalar-or-vector audio value flowing through signal plugs.
///
/// Invariants:
/// - vector mode: all BLOCK_SIZE samples are valid
/// - scalar mode, not expanded: only `samples[0]` is valid
/// - scalar mode, expanded: all samples hold the scalar value
pub struct Signal {
    is_scalar: bool,
    is_expanded: Cell<bool>,
    samples: UnsafeCell<SampleBlock>,
}

// SAFETY: the interior cells are only written from the thread that owns the
// graph (tick and edits are serialized by the manager's mutex), never shared
// across threads while in use.
unsafe impl Send for Signal {}

impl Signal {
    pub fn new() -> Self {
        Self::from_scalar(0.0)
    }

    pub fn from_scalar(value: f32) -> Self {
        Self {
            is_scalar: true,
            is_expanded: Cell::new(false),
            samples: UnsafeCell::new(SampleBlock([value; BLOCK_SIZE])),
        }
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        !self.is_scalar || self.is_expanded.get()
    }

    /// First sample; in scalar mode, the scalar value.
    #[inline]
    pub fn scalar(&self) -> f32 {
        self.samples()[0]
    }

    /// Switch to scalar mode. When the same scalar is already expanded this
    /// is a no-op, so the expansion cache survives redundant writes.
    pub fn set_scalar(&mut self, value: f32) {
        if self.is_scalar && self.is_expanded.get() && self.scalar() == value {
            return;
        }

        self.is_scalar = true;
        self.is_expanded.set(false);
        self.samples.get_mut().0[0] = value;
    }

    /// Mark the signal as holding BLOCK_SIZE independent values. The caller
    /// is responsible for filling the buffer.
    pub fn set_vector(&mut self) {
        self.is_scalar = false;
        self.is_expanded.set(true);
    }

    /// Broadcast the scalar into the whole buffer, once. Returns whether any
    /// broadcast work was performed (false on every repeat call).
    pub fn expand(&self) -> bool {
        if !self.is_scalar || self.is_expanded.get() {
            return false;
        }

        // SAFETY: no shared sample borrow is live here; callers obtain sample
        // slices only after expand() returns, and graph processing is
        // single-threaded under the manager lock.
        let samples = unsafe { &mut (*self.samples.get()).0 };
        let value = samples[0];
        for s in samples[1..].iter_mut() {
            *s = value;
        }

        self.is_expanded.set(true);
        true
    }

    /// The sample buffer. Valid past index 0 only in vector mode or after
    /// `expand()`.
    #[inline]
    pub fn samples(&self) -> &[f32; BLOCK_SIZE] {
        // SAFETY: the only mutation through a shared reference is expand(),
        // which completes before any sample slice is handed out.
        unsafe { &(*self.samples.get()).0 }
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32; BLOCK_SIZE] {
        &mut self.samples.get_mut().0
    }

    /// Mean value over the block.
    pub fn mean(&self) -> f32 {
        if self.is_scalar {
            self.scalar()
        } else {
            audio_buffer_sum(self.samples()) / BLOCK_SIZE as f32
        }
    }

    pub fn set_zero(&mut self) {
        self.set_scalar(0.0);
    }

    pub fn set_one(&mut self) {
        self.set_scalar(1.0);
    }

    /// Copy from another signal, preserving scalar/vector mode.
    pub fn set(&mut self, other: &Signal) {
        if other.is_scalar {
            self.set_scalar(other.scalar());
        } else {
            self.set_vector();
            self.samples_mut().copy_from_slice(other.samples());
        }
    }

    /// self = other * gain
    pub fn set_mul(&mut self, other: &Signal, gain: f32) {
        if other.is_scalar {
            self.set_scalar(other.scalar() * gain);
        } else {
            self.set_vector();
            let dst = self.samples.get_mut();
            for (d, s) in dst.0.iter_mut().zip(other.samples()) {
                *d = s * gain;
            }
        }
    }

    /// self = other * gain, per-sample gain.
    pub fn set_mul_sig(&mut self, other: &Signal, gain: &Signal) {
        if other.is_scalar && gain.is_scalar {
            self.set_scalar(other.scalar() * gain.scalar());
        } else if gain.is_scalar {
            self.set_mul(other, gain.scalar());
        } else if other.is_scalar {
            let value = other.scalar();
            self.set_vector();
            let dst = self.samples.get_mut();
            for (d, g) in dst.0.iter_mut().zip(gain.samples()) {
                *d = value * g;
            }
        } else {
            self.set_vector();
            let dst = self.samples.get_mut();
            for (i, d) in dst.0.iter_mut().enumerate() {
                *d = other.samples()[i] * gain.samples()[i];
            }
        }
    }

    /// self += other
    pub fn add(&mut self, other: &Signal) {
        if self.is_scalar && other.is_scalar {
            self.set_scalar(self.scalar() + other.scalar());
        } else {
            other.expand();
            self.expand();
            self.set_vector();
            audio_buffer_add(self.samples_mut(), other.samples());
        }
    }

    /// self += other * gain
    pub fn add_mul(&mut self, other: &Signal, gain: f32) {
        if self.is_scalar && other.is_scalar {
            self.set_scalar(self.scalar() + other.scalar() * gain);
        } else {
            other.expand();
            self.expand();
            self.set_vector();
            audio_buffer_add_mul(self.samples_mut(), other.samples(), gain);
        }
    }

    /// self += other * gain, per-sample gain.
    pub fn add_mul_sig(&mut self, other: &Signal, gain: &Signal) {
        if self.is_scalar && other.is_scalar && gain.is_scalar {
            self.set_scalar(self.scalar() + other.scalar() * gain.scalar());
        } else if gain.is_scalar {
            self.add_mul(other, gain.scalar());
        } else {
            other.expand();
            self.expand();
            self.set_vector();
            let dst = self.samples.get_mut();
            for (i, d) in dst.0.iter_mut().enumerate() {
                *d += other.samples()[i] * gain.samples()[i];
            }
        }
    }

    /// self *= other
    pub fn mul(&mut self, other: &Signal) {
        if self.is_scalar && other.is_scalar {
            self.set_scalar(self.scalar() * other.scalar());
        } else if self.is_scalar {
            let value = self.scalar();

            if value == 0.0 {
                // everything times zero stays zero, skip the buffer touch
                self.set_zero();
            } else if value == 1.0 {
                // times one is a straight copy
                self.set(other);
            } else {
                self.expand();
                self.set_vector();
                audio_buffer_mul_buf(self.samples_mut(), other.samples());
            }
        } else if other.is_scalar {
            let value = other.scalar();

            if value == 0.0 {
                self.set_zero();
            } else if value == 1.0 {
                // common case: nothing to do
            } else {
                audio_buffer_mul(self.samples_mut(), value);
            }
        } else {
            audio_buffer_mul_buf(self.samples_mut(), other.samples());
        }
    }

    /// self *= other * gain
    pub fn mul_mul(&mut self, other: &Signal, gain: f32) {
        other.expand();
        self.expand();
        self.set_vector();
        let dst = self.samples.get_mut();
        for (d, s) in dst.0.iter_mut().zip(other.samples()) {
            *d *= s * gain;
        }
    }

    /// self *= other * gain, per-sample gain.
    pub fn mul_mul_sig(&mut self, other: &Signal, gain: &Signal) {
        if gain.is_scalar {
            self.mul_mul(other, gain.scalar());
        } else {
            other.expand();
            self.expand();
            self.set_vector();
            let dst = self.samples.get_mut();
            for (i, d) in dst.0.iter_mut().enumerate() {
                *d *= other.samples()[i] * gain.samples()[i];
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Signal {
    fn clone(&self) -> Self {
        Self {
            is_scalar: self.is_scalar,
            is_expanded: self.is_expanded.clone(),
            samples: UnsafeCell::new(SampleBlock(*self.samples())),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar {
            write!(f, "Signal::scalar({})", self.scalar())
        } else {
            write!(f, "Signal::vector([{}; {}])", self.samples()[0], BLOCK_SIZE)
        }
    }
}

// Flat buffer helpers shared by Signal and fan-in summation.

pub fn audio_buffer_add(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

pub fn audio_buffer_add_mul(dst: &mut [f32], src: &[f32], gain: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s * gain;
    }
}

pub fn audio_buffer_mul(dst: &mut [f32], gain: f32) {
    for d in dst.iter_mut() {
        *d *= gain;
    }
}

pub fn audio_buffer_mul_buf(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d *= s;
    }
}

pub fn audio_buffer_sum(src: &[f32]) -> f32 {
    src.iter().sum()
}
