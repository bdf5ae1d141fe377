//! page sized buffer used by the write path

use super::PAGE_SIZE;

#[derive(Debug)]
pub struct Page {
    pub index: u64,
    data: Box<[u8]>,
    uptodate: bool,
}

impl Page {
    pub fn new(index: u64) -> Self {
        Page {
            index,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            uptodate: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_uptodate(&self) -> bool {
        self.uptodate
    }

    pub fn set_uptodate(&mut self) {
        self.uptodate = true;
    }

    /// zero `[from, to)` of the page
    pub fn zero_segment(&mut self, from: usize, to: usize) {
        let to = to.min(PAGE_SIZE);
        if from < to {
            self.data[from..to].fill(0);
        }
    }
}
