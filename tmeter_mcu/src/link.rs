use std::collections::VecDeque;

/// Byte transport between the controller and the host (UART on a board).
pub trait Link {
    /// Next received byte, or `None` when nothing is pending.
    fn read_byte(&mut self) -> Option<u8>;
    fn write_all(&mut self, bytes: &[u8]);
}

/// In-memory link: the owner pushes received bytes in and drains transmitted bytes out.
#[derive(Debug, Default)]
pub struct BufferLink {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl BufferLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn take_transmitted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl Link for BufferLink {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes);
    }
}
