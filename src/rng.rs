//! WELL512-style PRNG for victim-pool selection.
//!
//! The exact algorithm is not part of the external contract; any
//! reasonable uniform 32-bit generator is acceptable as long as it is
//! reseeded per pool, per `Acquire`, from an OS randomness source. This
//! one follows the classic WELL512 reference construction: 16 words of
//! state, four XOR-shift taps per step.

use rand::rngs::OsRng;
use rand::RngCore;

pub struct Well512 {
  state: [u32; 16],
  index: usize,
}

impl Well512 {
  /// Seed fresh state from the OS randomness source.
  pub fn seeded() -> Well512 {
    let mut state = [0u32; 16];
    OsRng.fill_bytes(bytemuck_u32_bytes(&mut state));
    Well512 { state, index: 0 }
  }

  pub fn reseed(&mut self) {
    OsRng.fill_bytes(bytemuck_u32_bytes(&mut self.state));
    self.index = 0;
  }

  pub fn next_u32(&mut self) -> u32 {
    let mut a = self.state[self.index];
    let c = self.state[(self.index + 13) & 15];
    let b = a ^ c ^ (a << 16) ^ (c << 15);

    let c2 = self.state[(self.index + 9) & 15];
    let c2 = c2 ^ (c2 >> 11);

    let out = b ^ c2;
    self.state[self.index] = out;

    a = self.state[(self.index + 15) & 15];
    let d = a ^ (a << 2) ^ b ^ (b << 18) ^ (c2 << 28);
    self.index = (self.index + 15) & 15;
    self.state[self.index] = d;

    self.state[self.index]
  }

  /// Uniform value in `[0, bound)`. `bound` must be nonzero.
  pub fn next_below(&mut self, bound: usize) -> usize {
    debug_assert!(bound > 0);
    (self.next_u32() as u64 * bound as u64 >> 32) as usize
  }
}

fn bytemuck_u32_bytes(words: &mut [u32; 16]) -> &mut [u8] {
  // SAFETY: u32 has no padding/alignment requirements beyond byte access,
  // and the resulting slice's lifetime is tied to `words`.
  unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, words.len() * 4) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn produces_varying_output() {
    let mut rng = Well512::seeded();
    let a = rng.next_u32();
    let b = rng.next_u32();
    let c = rng.next_u32();
    assert!(a != b || b != c);
  }

  #[test]
  fn next_below_is_in_range() {
    let mut rng = Well512::seeded();
    for _ in 0..1000 {
      let v = rng.next_below(7);
      assert!(v < 7);
    }
  }

  #[test]
  fn reseed_changes_state() {
    let mut rng = Well512::seeded();
    let before = rng.state;
    rng.reseed();
    assert_ne!(before, rng.state);
  }
}
