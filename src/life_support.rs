//! Call-scoped keep-alive stack for conversion temporaries.

use log::trace;
use tether_core::{CastError, Dynamic};

/// Temporaries that must outlive the bridged call that produced them.
///
/// Patients are stored on one stack; each frame remembers where it starts.
/// Every stored patient owns one reference, which the runtime releases when
/// the frame is popped.
#[derive(Debug)]
pub struct LifeSupport {
    patients: Vec<Dynamic>,
    frames: Vec<usize>,
    shrink_threshold: usize,
}

impl LifeSupport {
    pub fn new(shrink_threshold: usize) -> Self {
        Self {
            patients: Vec::new(),
            frames: Vec::new(),
            shrink_threshold,
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(self.patients.len());
        trace!("life support frame {} pushed", self.frames.len());
    }

    /// Pop the innermost frame, returning its patients for release.
    ///
    /// # Panics
    ///
    /// Panics if no frame is active.
    pub fn pop_frame(&mut self) -> Vec<Dynamic> {
        let Some(start) = self.frames.pop() else {
            panic!("life support stack popped with no active frame");
        };
        let released = self.patients.split_off(start);
        let capacity = self.patients.capacity();
        if capacity > self.shrink_threshold && self.patients.len() * 4 < capacity {
            self.patients.shrink_to_fit();
        }
        trace!(
            "life support frame {} popped, releasing {} patients",
            self.frames.len() + 1,
            released.len()
        );
        released
    }

    /// Record a patient in the innermost frame.
    ///
    /// Returns `Ok(false)` when the patient is already in that frame, in
    /// which case the caller must not hand over another reference.
    pub fn add_patient(&mut self, patient: Dynamic) -> Result<bool, CastError> {
        let Some(&start) = self.frames.last() else {
            return Err(CastError::NoLifeSupport);
        };
        if self.patients[start..].contains(&patient) {
            return Ok(false);
        }
        self.patients.push(patient);
        Ok(true)
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of patients across all frames.
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.patients.capacity()
    }
}
