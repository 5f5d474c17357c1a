//! Greedy maximal-rectangle decomposition of occupied grid cells.
//!
//! Collapses a set of unit cells into axis-aligned rectangles by repeatedly
//! extracting the largest rectangle of the remaining occupancy (histogram +
//! monotonic stack per row). Greedy, not globally minimal; deterministic for
//! a given input set.
#![forbid(unsafe_code)]

/// One extracted rectangle. `min`/`max` are inclusive corners in the same
/// coordinate space as the input positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub area: u32,
    pub min: (i32, i32),
    pub max: (i32, i32),
}

impl Rect {
    #[inline]
    pub fn width(&self) -> i32 {
        self.max.0 - self.min.0 + 1
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.max.1 - self.min.1 + 1
    }

    #[inline]
    pub fn contains(&self, pos: (i32, i32)) -> bool {
        pos.0 >= self.min.0 && pos.0 <= self.max.0 && pos.1 >= self.min.1 && pos.1 <= self.max.1
    }

    /// All unit cells covered by this rectangle, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let (x0, y0) = self.min;
        let (x1, y1) = self.max;
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
    }
}

#[derive(Clone, Copy)]
struct LocalRect {
    area: u64,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

/// Largest all-ones rectangle in the occupancy matrix, or None if empty.
/// Ties keep the first candidate in row-major scan order.
fn find_maximal(matrix: &[u8], w: usize, h: usize) -> Option<LocalRect> {
    let mut best: Option<LocalRect> = None;
    let mut heights = vec![0u32; w];
    let mut stack: Vec<usize> = Vec::with_capacity(w + 1);
    for row in 0..h {
        // Running histogram: a column's height is the count of consecutive
        // occupied cells ending at this row.
        for (col, height) in heights.iter_mut().enumerate() {
            *height = if matrix[row * w + col] == 0 {
                0
            } else {
                *height + 1
            };
        }
        stack.clear();
        for col in 0..=w {
            let cur = if col < w { heights[col] } else { 0 };
            while let Some(&top) = stack.last() {
                if heights[top] <= cur {
                    break;
                }
                stack.pop();
                let height = heights[top] as usize;
                let left = stack.last().map_or(0, |&i| i + 1);
                let area = (height * (col - left)) as u64;
                if best.is_none_or(|b| area > b.area) {
                    best = Some(LocalRect {
                        area,
                        x0: left,
                        y0: row + 1 - height,
                        x1: col - 1,
                        y1: row,
                    });
                }
            }
            if col < w {
                stack.push(col);
            }
        }
    }
    best
}

/// Decompose a set of occupied unit-cell positions into covering rectangles.
///
/// The union of the returned rectangles' cells equals the input set exactly
/// and no two rectangles overlap. Duplicate input positions are ignored.
/// Empty input returns an empty list. A dense matrix over the bounding box
/// is allocated, so extremely sparse far-apart inputs are the caller's risk.
pub fn decompose(positions: &[(i32, i32)]) -> Vec<Rect> {
    let Some(&(fx, fy)) = positions.first() else {
        return Vec::new();
    };

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (fx, fy, fx, fy);
    for &(x, y) in &positions[1..] {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let w = (i64::from(max_x) - i64::from(min_x)) as usize + 1;
    let h = (i64::from(max_y) - i64::from(min_y)) as usize + 1;

    let mut matrix = vec![0u8; w * h];
    let mut remaining = 0usize;
    for &(x, y) in positions {
        let idx =
            (i64::from(y) - i64::from(min_y)) as usize * w + (i64::from(x) - i64::from(min_x)) as usize;
        if matrix[idx] == 0 {
            matrix[idx] = 1;
            remaining += 1;
        }
    }

    let mut rects = Vec::new();
    while remaining > 0 {
        let Some(best) = find_maximal(&matrix, w, h) else {
            break;
        };
        for y in best.y0..=best.y1 {
            for x in best.x0..=best.x1 {
                let idx = y * w + x;
                if matrix[idx] == 1 {
                    matrix[idx] = 0;
                    remaining -= 1;
                }
            }
        }
        // Translate back out of bounding-box space.
        rects.push(Rect {
            area: best.area as u32,
            min: (best.x0 as i32 + min_x, best.y0 as i32 + min_y),
            max: (best.x1 as i32 + min_x, best.y1 as i32 + min_y),
        });
    }
    rects
}
