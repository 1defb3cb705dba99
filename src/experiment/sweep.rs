//! Index traversal over the scan stack.
//!
//! Yields one `(indices, deltas)` pair per acquisition point, innermost
//! axis fastest. Deltas describe how each index changed since the previous
//! point: `+1` advanced, `-1` stepped back (a wrap to the start, or a
//! backward raster step), `0` unchanged. The first point is all zeros with
//! all deltas `+1`, so every scan applies its starting position.
//!
//! A raster axis sweeps back and forth instead of snapping to the start:
//! at the boundary it keeps its index, reports a zero delta and flips
//! direction, so the hardware never flies back across its range.

/// Odometer over the acquisition grid.
#[derive(Debug, Clone)]
pub struct SweepIter {
    dims: Vec<usize>,
    raster: Vec<bool>,
    directions: Vec<i8>,
    indices: Vec<usize>,
    unbounded_outer: bool,
    started: bool,
    done: bool,
}

impl SweepIter {
    /// Iterate `dims` (innermost first). `raster` marks axes that sweep
    /// boustrophedon; `unbounded_outer` lets the outermost index grow
    /// without limit, for scans whose length is decided while running.
    pub fn new(dims: &[usize], raster: &[bool], unbounded_outer: bool) -> Self {
        let n = dims.len();
        let mut raster = raster.to_vec();
        raster.resize(n, false);
        Self {
            dims: dims.to_vec(),
            raster,
            directions: vec![1; n],
            indices: vec![0; n],
            unbounded_outer,
            started: false,
            done: false,
        }
    }

    /// Indices of the most recently yielded point.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Iterator for SweepIter {
    type Item = (Vec<usize>, Vec<i8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let n = self.dims.len();
        if !self.started {
            self.started = true;
            if n == 0 || self.dims.contains(&0) {
                self.done = true;
                return None;
            }
            return Some((self.indices.clone(), vec![1; n]));
        }

        let mut deltas = vec![0i8; n];
        for k in 0..n {
            let unbounded = self.unbounded_outer && k == n - 1;
            if self.raster[k] && !unbounded {
                let dir = self.directions[k];
                let next = self.indices[k] as i64 + i64::from(dir);
                if next >= 0 && (next as usize) < self.dims[k] {
                    self.indices[k] = next as usize;
                    deltas[k] = dir;
                    return Some((self.indices.clone(), deltas));
                }
                // Boundary: hold position, flip, let the carry move outward.
                self.directions[k] = -dir;
            } else if unbounded || self.indices[k] + 1 < self.dims[k] {
                self.indices[k] += 1;
                deltas[k] = 1;
                return Some((self.indices.clone(), deltas));
            } else {
                self.indices[k] = 0;
                deltas[k] = -1;
            }
        }
        self.done = true;
        None
    }
}
