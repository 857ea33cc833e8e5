// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconstruction of monotonic counters from the narrower, wrapping kernel counters.
//!
//! The kernel reports a 32-bit low word and a short overflow word per counter. The agent keeps
//! a 64-bit value whose low bits mirror the kernel reading and whose high bits count the
//! wraps the agent itself has observed.

use tracing::debug;

/// Bit split of one reconstructed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterLayout {
    /// Bits mirrored from the kernel reading.
    pub mask: u64,
    /// Bits owned by the agent.
    pub oflow_mask: u64,
    /// One agent-side wrap.
    pub incr: u64,
}

impl CounterLayout {
    /// 48 kernel bits (32-bit low word, 16-bit overflow word).
    pub const BYTES: CounterLayout = CounterLayout {
        mask: 0x0000_FFFF_FFFF_FFFF,
        oflow_mask: 0xFFFF_0000_0000_0000,
        incr: 0x0001_0000_0000_0000,
    };

    /// 40 kernel bits (32-bit low word, 8-bit overflow word).
    pub const PACKETS: CounterLayout = CounterLayout {
        mask: 0x0000_00FF_FFFF_FFFF,
        oflow_mask: 0xFFFF_FF00_0000_0000,
        incr: 0x0000_0100_0000_0000,
    };

    /// Merge a fresh kernel reading `kernel` into the `stored` value.
    ///
    /// A kernel reading below the stored kernel bits is a wrap when the distance is more
    /// than half the kernel width. A shorter backwards step cannot come from a wrap: the
    /// baseline is reset to the new reading and no traffic is accounted.
    #[must_use]
    pub fn reconstruct(&self, stored: u64, kernel: u64) -> Reconstructed {
        let kernel = kernel & self.mask;
        let masked = stored & self.mask;
        let oflow = stored & self.oflow_mask;

        if masked > kernel {
            if masked - kernel > self.mask / 2 {
                let value = oflow.wrapping_add(self.incr) | kernel;
                return Reconstructed {
                    value,
                    diff: value.wrapping_sub(stored),
                    step: CounterStep::Wrapped,
                };
            }
            debug!("counter regression: stored {stored:#x} kernel {kernel:#x}, resetting baseline");
            return Reconstructed {
                value: oflow | kernel,
                diff: 0,
                step: CounterStep::Regressed,
            };
        }

        let value = oflow | kernel;
        let diff = value - stored;
        Reconstructed {
            value,
            diff,
            step: if diff == 0 {
                CounterStep::Unchanged
            } else {
                CounterStep::Advanced
            },
        }
    }

    /// True when the kernel has nothing newer than what is stored.
    ///
    /// Used by the eviction test: a kernel count beyond the stored one means the flow saw
    /// traffic the agent has not accounted yet.
    #[must_use]
    pub fn is_stale(&self, stored: u64, kernel: u64) -> bool {
        (stored & self.mask) >= (kernel & self.mask)
    }
}

/// What happened to the counter on a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStep {
    Advanced,
    Unchanged,
    Wrapped,
    Regressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconstructed {
    pub value: u64,
    pub diff: u64,
    pub step: CounterStep,
}

/// Combine the kernel overflow word and low word into one reading.
#[must_use]
pub fn combine_counter(oflow: u64, low: u32) -> u64 {
    (oflow << 32) | u64::from(low)
}

#[must_use]
pub fn updated_bytes(stored: u64, kernel: u64) -> Reconstructed {
    CounterLayout::BYTES.reconstruct(stored, kernel)
}

#[must_use]
pub fn updated_packets(stored: u64, kernel: u64) -> Reconstructed {
    CounterLayout::PACKETS.reconstruct(stored, kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_wrap_bumps_overflow() {
        let stored = 0x0000_FFFF_FFFF_FFF5;
        let kernel = combine_counter(0, 10);
        let r = updated_bytes(stored, kernel);
        assert_eq!(r.step, CounterStep::Wrapped);
        assert_eq!(r.value, 0x0001_0000_0000_000A);
        assert_eq!(r.diff, 21);
    }

    #[test]
    fn plain_advance() {
        let r = updated_bytes(0x0002_0000_0000_0010, combine_counter(0, 0x30));
        assert_eq!(r.value, 0x0002_0000_0000_0030);
        assert_eq!(r.diff, 0x20);
        assert_eq!(r.step, CounterStep::Advanced);

        let r = updated_bytes(r.value, combine_counter(0, 0x30));
        assert_eq!(r.diff, 0);
        assert_eq!(r.step, CounterStep::Unchanged);
    }

    #[test]
    fn overflow_word_is_part_of_the_reading() {
        let kernel = combine_counter(3, 7);
        assert_eq!(kernel, 0x0000_0003_0000_0007);
        let r = updated_bytes(0, kernel);
        assert_eq!(r.value, kernel);
        assert_eq!(r.diff, kernel);
    }

    #[test]
    fn small_backwards_step_resets_baseline() {
        let stored = 0x0001_0000_0000_1000;
        let r = updated_bytes(stored, 0x800);
        assert_eq!(r.step, CounterStep::Regressed);
        assert_eq!(r.value, 0x0001_0000_0000_0800);
        assert_eq!(r.diff, 0);

        // accounting resumes from the new baseline
        let r = updated_bytes(r.value, 0x900);
        assert_eq!(r.diff, 0x100);
    }

    #[test]
    fn packets_use_forty_kernel_bits() {
        let stored = 0x0000_00FF_FFFF_FFFE;
        let r = updated_packets(stored, combine_counter(0, 1));
        assert_eq!(r.step, CounterStep::Wrapped);
        assert_eq!(r.value, 0x0000_0100_0000_0001);
        assert_eq!(r.diff, 3);

        // a 48-bit byte-sized reading does not fit the packet layout
        let r = updated_packets(0, 0x0000_FF00_0000_0005);
        assert_eq!(r.value, 5);
    }

    #[test]
    fn staleness() {
        let layout = CounterLayout::BYTES;
        assert!(layout.is_stale(100, 100));
        assert!(layout.is_stale(0x0001_0000_0000_0064, 100));
        assert!(!layout.is_stale(100, 101));
    }

    fn check_monotonic(layout: CounterLayout, increments: &[u32]) {
        let mut kernel: u64 = 0;
        let mut stored: u64 = 0;
        let mut total: u64 = 0;
        for inc in increments {
            kernel = (kernel + u64::from(*inc)) & layout.mask;
            total += u64::from(*inc);
            let r = layout.reconstruct(stored, kernel);
            assert!(r.value >= stored);
            assert_eq!(r.value - stored, r.diff);
            assert_ne!(r.step, CounterStep::Regressed);
            stored = r.value;
            assert_eq!(stored, total);
        }
    }

    #[test]
    fn reconstruction_is_monotonic() {
        bolero::check!()
            .with_type::<Vec<u32>>()
            .for_each(|increments| {
                check_monotonic(CounterLayout::BYTES, increments);
                check_monotonic(CounterLayout::PACKETS, increments);
            });
    }

    #[test]
    fn monotonic_across_many_wraps() {
        // each step is below half of the packet width, so every backwards reading is a wrap
        let increments = vec![u32::MAX; 1024];
        check_monotonic(CounterLayout::PACKETS, &increments);
        check_monotonic(CounterLayout::BYTES, &increments);
    }
}
