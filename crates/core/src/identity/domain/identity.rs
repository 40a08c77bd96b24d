pub type StableId = u32;

/// A tracked person: the running mean of every observation currently
/// mapped to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub stable_id: StableId,
    pub centroid: Vec<f32>,
    pub member_count: usize,
}

impl Identity {
    pub fn new(stable_id: StableId, centroid: Vec<f32>) -> Self {
        Self {
            stable_id,
            centroid,
            member_count: 0,
        }
    }

    /// Folds one observation into the running mean.
    pub fn add_member(&mut self, embedding: &[f32]) {
        let n = self.member_count as f64;
        for (c, x) in self.centroid.iter_mut().zip(embedding.iter()) {
            *c = ((*c as f64 * n + *x as f64) / (n + 1.0)) as f32;
        }
        self.member_count += 1;
    }

    /// Removes one observation from the running mean.
    ///
    /// The last member leaving keeps the centroid where it was, so an empty
    /// identity can still be matched later.
    pub fn remove_member(&mut self, embedding: &[f32]) {
        match self.member_count {
            0 => {}
            1 => self.member_count = 0,
            count => {
                let n = count as f64;
                for (c, x) in self.centroid.iter_mut().zip(embedding.iter()) {
                    *c = ((*c as f64 * n - *x as f64) / (n - 1.0)) as f32;
                }
                self.member_count -= 1;
            }
        }
    }
}
