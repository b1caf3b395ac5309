//! Connection port allocation
//!
//! Reuses the lowest gap in the set of assigned ports before handing out a
//! fresh one, so the live port range stays compact as clients come and go.

use crate::error::AppError;

/// Hands out per-client listening ports
#[derive(Debug)]
pub struct PortAllocator {
    /// Next never-used port; only ever moves forward
    next: u32,
}

impl PortAllocator {
    /// Create an allocator whose fresh ports start at `starting_port`
    pub fn new(starting_port: u16) -> Self {
        Self {
            next: starting_port as u32,
        }
    }

    /// Pick a port given the currently assigned ones (any order)
    ///
    /// The lowest `p` whose successor in sorted order is not `p + 1` yields
    /// `p + 1`. Without such a gap the counter is used and advanced.
    pub fn allocate(&mut self, assigned: &[u16]) -> Result<u16, AppError> {
        let mut sorted = assigned.to_vec();
        sorted.sort_unstable();

        let gap = sorted
            .windows(2)
            .find(|pair| pair[1] != pair[0] + 1)
            .map(|pair| pair[0] + 1);

        if let Some(port) = gap {
            return Ok(port);
        }

        let port = u16::try_from(self.next).map_err(|_| AppError::PortsExhausted(self.next))?;
        self.next += 1;
        Ok(port)
    }
}
