//! Drive timing model: how long a read takes depending on the position of the read head and the
//! contents of the drive's read-ahead buffer.

use super::volume::Platform;
use crate::common::chunk_file::PointerWrap;

/// Minimum turnaround time of the drive for a command
const COMMAND_LATENCY_US: u64 = 300;
/// Size of the read-ahead buffer. The drive keeps reading this far past the last read.
const STREAMING_BUFFER_SIZE: u64 = 1024 * 1024;
pub const DVD_SECTOR_SIZE: u64 = 0x800;
/// The drive always reads whole ECC blocks
pub const DVD_ECC_BLOCK_SIZE: u64 = 16 * DVD_SECTOR_SIZE;
/// Transfer rate from the read-ahead buffer to RAM, in bytes per second
const BUFFER_TRANSFER_RATE: u64 = 1024 * 1024 * 32;
/// Size of a single layer of a Wii disc
const WII_DISC_LAYER_SIZE: u64 = 2_294_912 * DVD_SECTOR_SIZE;

/// Radii of the data area, in meters
const DVD_INNER_RADIUS: f64 = 0.024;
const WII_DVD_OUTER_RADIUS: f64 = 0.058;
const GC_DVD_OUTER_RADIUS: f64 = 0.038;

/// CAV read speeds in bytes per second at the inner and outer radius
const GC_DISC_INNER_READ_SPEED: f64 = 1024. * 1024. * 2.1;
const GC_DISC_OUTER_READ_SPEED: f64 = 1024. * 1024. * 3.325;
const WII_DISC_INNER_READ_SPEED: f64 = 1024. * 1024. * 3.5;
const WII_DISC_OUTER_READ_SPEED: f64 = 1024. * 1024. * 8.45;

/// Seeks shorter than this (in meters) are handled with a faster, more precise movement
const SHORT_SEEK_DISTANCE: f64 = 0.001;
/// Seek constants in seconds
const SHORT_SEEK_CONSTANT: f64 = 0.045;
const LONG_SEEK_CONSTANT: f64 = 0.085;
/// Inverse head velocities in s/m
const SHORT_SEEK_VELOCITY_INVERSE: f64 = 50.;
const LONG_SEEK_VELOCITY_INVERSE: f64 = 4.5;

fn round_down(v: u64, align: u64) -> u64 {
    v - v % align
}

fn round_up(v: u64, align: u64) -> u64 {
    round_down(v + align - 1, align)
}

/// Radial position (in meters) of the byte at `offset`.
///
/// This uses the length of a rolled spiral: the area of the data region divided by the track
/// pitch. Inverting it for the radius at a given linear position the pitch cancels out and we
/// get `r = sqrt(offset / total * (outer^2 - inner^2) + inner^2)`. GameCube and Wii discs share
/// the same density so the Wii dimensions work for both. The second layer of a dual-layer disc
/// is assumed to run backwards from the outer edge.
pub fn physical_disc_position(offset: u64) -> f64 {
    let offset = if offset > WII_DISC_LAYER_SIZE {
        (WII_DISC_LAYER_SIZE * 2).saturating_sub(offset)
    } else {
        offset
    };

    let inner2 = DVD_INNER_RADIUS * DVD_INNER_RADIUS;
    let outer2 = WII_DVD_OUTER_RADIUS * WII_DVD_OUTER_RADIUS;

    (offset as f64 / WII_DISC_LAYER_SIZE as f64 * (outer2 - inner2) + inner2).sqrt()
}

/// Number of ticks needed to move the head between two offsets. Roughly linear in the radial
/// distance, with a different speed for short and long seeks.
pub fn seek_time(ticks_per_second: u64, offset_from: u64, offset_to: u64) -> u64 {
    let from = physical_disc_position(offset_from);
    let to = physical_disc_position(offset_to);

    let distance = (from - to).abs();

    let seconds = if distance < SHORT_SEEK_DISTANCE {
        SHORT_SEEK_CONSTANT + distance * SHORT_SEEK_VELOCITY_INVERSE
    } else {
        LONG_SEEK_CONSTANT + distance * LONG_SEEK_VELOCITY_INVERSE
    };

    (seconds * ticks_per_second as f64) as u64
}

/// Number of ticks needed to stream `length` bytes at `offset`, not counting any seek. The drive
/// is CAV so the speed is interpolated linearly between the inner and outer radius, taken at
/// the middle of the read.
pub fn raw_read_time(ticks_per_second: u64, platform: Platform, offset: u64, length: u64) -> u64 {
    let position = physical_disc_position(offset + length / 2);

    let (outer, inner_speed, outer_speed) = match platform {
        Platform::GameCube => (
            GC_DVD_OUTER_RADIUS,
            GC_DISC_INNER_READ_SPEED,
            GC_DISC_OUTER_READ_SPEED,
        ),
        Platform::Wii => (
            WII_DVD_OUTER_RADIUS,
            WII_DISC_INNER_READ_SPEED,
            WII_DISC_OUTER_READ_SPEED,
        ),
    };

    let speed = (position - DVD_INNER_RADIUS) / (outer - DVD_INNER_RADIUS)
        * (outer_speed - inner_speed)
        + inner_speed;

    (ticks_per_second as f64 * length as f64 / speed) as u64
}

/// State of the drive's read-ahead buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReadBuffer {
    start_offset: u64,
    end_offset: u64,
    /// Date at which the drive started filling the buffer
    start_time: u64,
    /// Date at which the buffer will be full
    end_time: u64,
}

impl ReadBuffer {
    pub fn new() -> ReadBuffer {
        ReadBuffer {
            start_offset: 0,
            end_offset: 0,
            start_time: 0,
            end_time: 0,
        }
    }

    /// Forget the buffer contents, for instance when the disc changes
    pub fn reset(&mut self) {
        *self = ReadBuffer::new();
    }

    /// Compute the number of ticks it will take to read `length` bytes at `dvd_offset`
    /// starting at date `now`, and update the buffer state accordingly.
    pub fn schedule_read(
        &mut self,
        now: u64,
        ticks_per_second: u64,
        platform: Platform,
        fast_disc_speed: bool,
        mut dvd_offset: u64,
        mut length: u64,
    ) -> u64 {
        // Bounds of the buffered region (end exclusive) and position of the head
        let (buffer_start, buffer_end, mut head_position) = if fast_disc_speed {
            (0, u64::MAX, 0)
        } else if self.start_time == self.end_time {
            // No buffer
            (0, 0, 0)
        } else {
            let start = self.end_offset.saturating_sub(STREAMING_BUFFER_SIZE);

            let end = if now >= self.end_time {
                self.end_offset
            } else {
                // Portion of the buffer filled so far
                let size = self.end_offset.saturating_sub(self.start_offset);
                let elapsed = now.saturating_sub(self.start_time);
                let filled = (elapsed as u128 * size as u128
                    / (self.end_time - self.start_time) as u128) as u64;

                self.start_offset + round_down(filled, DVD_ECC_BLOCK_SIZE)
            };

            // Reading before the buffer invalidates it, the head stays where it is
            if round_down(dvd_offset, DVD_ECC_BLOCK_SIZE) < start {
                (0, 0, end)
            } else {
                (start, end, end)
            }
        };

        trace!(
            "Read buffer: start=0x{:x} end=0x{:x} head=0x{:x}",
            buffer_start,
            buffer_end,
            head_position
        );

        let mut ticks = COMMAND_LATENCY_US * (ticks_per_second / 1_000_000);

        let mut buffered_blocks = 0;
        let mut unbuffered_blocks = 0;

        while length > 0 {
            let block = round_down(dvd_offset, DVD_ECC_BLOCK_SIZE);

            // Up to the end of the current block, the last chunk may be shorter
            let chunk = (round_up(dvd_offset + 1, DVD_ECC_BLOCK_SIZE) - dvd_offset).min(length);

            if block >= buffer_start && block < buffer_end {
                ticks += chunk * ticks_per_second / BUFFER_TRANSFER_RATE;
                buffered_blocks += 1;
            } else {
                if block != head_position {
                    ticks += seek_time(ticks_per_second, head_position, block);
                } else {
                    ticks += raw_read_time(ticks_per_second, platform, block, DVD_ECC_BLOCK_SIZE);
                }

                unbuffered_blocks += 1;
                head_position = block + DVD_ECC_BLOCK_SIZE;
            }

            dvd_offset += chunk;
            length -= chunk;
        }

        // The buffer is only reused when reading forward
        let last_block = round_up(dvd_offset, DVD_ECC_BLOCK_SIZE);

        let short_read_at_start =
            last_block == buffer_start + DVD_ECC_BLOCK_SIZE && buffer_start != buffer_end;

        if !short_read_at_start {
            self.start_offset = if last_block > buffer_end {
                last_block
            } else {
                buffer_end
            };

            self.end_offset = last_block + STREAMING_BUFFER_SIZE - DVD_ECC_BLOCK_SIZE;
            self.start_time = now + ticks;
            self.end_time = self.start_time
                + raw_read_time(
                    ticks_per_second,
                    platform,
                    self.start_offset,
                    self.end_offset.saturating_sub(self.start_offset),
                );
        }

        debug!(
            "Scheduled read: {} unbuffered and {} buffered ECC blocks, {} ticks ({}us)",
            unbuffered_blocks,
            buffered_blocks,
            ticks,
            ticks * 1_000_000 / ticks_per_second
        );

        ticks
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.wrap(&mut self.start_offset);
        p.wrap(&mut self.end_offset);
        p.wrap(&mut self.start_time);
        p.wrap(&mut self.end_time);
    }
}
