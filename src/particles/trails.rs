//! Line data handed to the renderer: motion trails and graph edges

use glam::Vec3;

use super::map_range;

/// One line segment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Segment {
    pub from: Vec3,
    pub to: Vec3,
}

impl Segment {
    pub fn is_degenerate(&self) -> bool {
        self.from == self.to
    }
}

/// Per-particle trail segments for swarm mode.
///
/// Active particles get previous -> current; inactive ones a zero-length
/// segment at their position so the renderer draws nothing.
#[derive(Debug, Clone, Default)]
pub struct TrailBuffer {
    segments: Vec<Segment>,
}

impl TrailBuffer {
    pub fn new(count: usize) -> Self {
        Self {
            segments: vec![Segment::default(); count],
        }
    }

    pub fn update(&mut self, positions: &[Vec3], previous: &[Vec3], active: usize) {
        self.segments.resize(positions.len(), Segment::default());
        for (i, ((segment, &pos), &prev)) in self
            .segments
            .iter_mut()
            .zip(positions)
            .zip(previous)
            .enumerate()
        {
            *segment = if i < active {
                Segment { from: prev, to: pos }
            } else {
                Segment { from: pos, to: pos }
            };
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Graph-mode edges: node `i - 1` to node `i`, recorded as nodes spawn
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    edges: Vec<Segment>,
    count: usize,
}

impl EdgeList {
    pub fn new(capacity: usize) -> Self {
        Self {
            edges: vec![Segment::default(); capacity.saturating_sub(1)],
            count: 0,
        }
    }

    /// Record the edge arriving at node `index`
    pub fn connect(&mut self, index: usize, from: Vec3, to: Vec3) {
        if index == 0 {
            return;
        }
        let slot = index - 1;
        if slot >= self.edges.len() {
            self.edges.resize(slot + 1, Segment::default());
        }
        self.edges[slot] = Segment { from, to };
        self.count = index;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Number of live edges
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn edges(&self) -> &[Segment] {
        &self.edges[..self.count.min(self.edges.len())]
    }
}

/// Opacity of the full-screen fade quad drawn before each frame.
///
/// Stronger trails fade less per frame. When paused the old frame clears quickly.
pub fn fade_opacity(trail_strength: f32, playing: bool) -> f32 {
    if playing {
        map_range(trail_strength.clamp(0.0, 1.0), 0.0, 1.0, 0.22, 0.05)
    } else {
        0.6
    }
}
