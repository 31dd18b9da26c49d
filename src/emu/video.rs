//! The AVC64 video chip.
//!
//! The AVC64 is a command/latch device, not a linear framebuffer mapped
//! into CPU address space. Software loads the data and coordinate latches
//! through the bus port, then issues `plot`/`clear` commands; the chip
//! owns its framebuffer outright and it survives CPU resets.
//!
//! A [`RefreshDriver`] samples the framebuffer at a fixed cadence on its
//! own thread and publishes snapshot copies over a watch channel for the
//! rendering surface. The snapshot copy bounds any tearing to "stale by
//! one frame"; neither side ever waits on the other beyond the per-command
//! mutex hold.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;

use super::registers::Register8;
use super::EmuError;

pub const RASTER_WIDTH: usize = 240;
pub const RASTER_HEIGHT: usize = 180;
pub const RASTER_SIZE: usize = RASTER_WIDTH * RASTER_HEIGHT;

/// Cadence at which the refresh driver samples the framebuffer.
pub const REFRESH_PERIOD: Duration = Duration::from_millis(5);

/// Shared handle to the chip's framebuffer.
pub type Framebuffer = Arc<Mutex<Box<[u8]>>>;

/// Command selectors of the AVC64 port, one per port address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// Write the D1 latch to the cell at (X, Y).
    Plot,
    /// Fill the whole framebuffer with the D1 latch.
    Clear,
    SetX,
    SetY,
    SetD1,
    SetD2,
    SetD3,
    SetD4,
    /// Reserved text-drawing mode.
    Text,
}

impl VideoMode {
    /// Number of port addresses the chip occupies on the bus.
    pub const PORT_COUNT: u16 = 9;

    /// Decodes a port offset (address minus the port base) into a mode.
    pub fn from_port_offset(offset: u16) -> Option<Self> {
        match offset {
            0 => Some(Self::Plot),
            1 => Some(Self::Clear),
            2 => Some(Self::SetX),
            3 => Some(Self::SetY),
            4 => Some(Self::SetD1),
            5 => Some(Self::SetD2),
            6 => Some(Self::SetD3),
            7 => Some(Self::SetD4),
            8 => Some(Self::Text),
            _ => None,
        }
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plot => "plot",
            Self::Clear => "clear",
            Self::SetX => "set-x",
            Self::SetY => "set-y",
            Self::SetD1 => "set-d1",
            Self::SetD2 => "set-d2",
            Self::SetD3 => "set-d3",
            Self::SetD4 => "set-d4",
            Self::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// The video chip: four data latches, two coordinate latches, and the
/// framebuffer.
pub struct Avc64 {
    d1: Register8,
    d2: Register8,
    d3: Register8,
    d4: Register8,
    x: Register8,
    y: Register8,
    framebuffer: Framebuffer,
}

impl Avc64 {
    pub fn new() -> Self {
        Self {
            d1: Register8::default(),
            d2: Register8::default(),
            d3: Register8::default(),
            d4: Register8::default(),
            x: Register8::default(),
            y: Register8::default(),
            framebuffer: Arc::new(Mutex::new(vec![0u8; RASTER_SIZE].into_boxed_slice())),
        }
    }

    /// Dispatches a port write.
    pub fn write(&mut self, data: u8, mode: VideoMode) -> Result<(), EmuError> {
        match mode {
            VideoMode::Plot => {
                let index = self.cell_index()?;
                self.lock_framebuffer()[index] = self.d1.get();
                Ok(())
            }
            VideoMode::Clear => {
                self.lock_framebuffer().fill(self.d1.get());
                Ok(())
            }
            VideoMode::SetX => {
                self.x.set(data);
                Ok(())
            }
            VideoMode::SetY => {
                self.y.set(data);
                Ok(())
            }
            VideoMode::SetD1 => {
                self.d1.set(data);
                Ok(())
            }
            VideoMode::SetD2 => {
                self.d2.set(data);
                Ok(())
            }
            VideoMode::SetD3 => {
                self.d3.set(data);
                Ok(())
            }
            VideoMode::SetD4 => {
                self.d4.set(data);
                Ok(())
            }
            VideoMode::Text => Err(EmuError::UnimplementedMode(mode)),
        }
    }

    /// Dispatches a port read. Only `plot` is readable; it returns the
    /// framebuffer cell at (X, Y).
    pub fn read(&self, mode: VideoMode) -> Result<u8, EmuError> {
        match mode {
            VideoMode::Plot => {
                let index = self.cell_index()?;
                Ok(self.lock_framebuffer()[index])
            }
            _ => Err(EmuError::UnreadableMode(mode)),
        }
    }

    /// Shared framebuffer handle for the refresh driver.
    pub fn framebuffer(&self) -> Framebuffer {
        Arc::clone(&self.framebuffer)
    }

    /// Copies the current framebuffer contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock_framebuffer().to_vec()
    }

    fn cell_index(&self) -> Result<usize, EmuError> {
        let (x, y) = (self.x.get(), self.y.get());
        let index = x as usize + y as usize * RASTER_WIDTH;
        if index < RASTER_SIZE && (x as usize) < RASTER_WIDTH {
            Ok(index)
        } else {
            Err(EmuError::OutOfBoundsCoordinate { x, y })
        }
    }

    fn lock_framebuffer(&self) -> std::sync::MutexGuard<'_, Box<[u8]>> {
        self.framebuffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Avc64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples a framebuffer at a fixed cadence on a dedicated thread and
/// publishes snapshot copies through a watch channel.
pub struct RefreshDriver {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshDriver {
    /// Starts the refresh thread. The returned receiver yields a new
    /// framebuffer snapshot roughly every `period`.
    pub fn spawn(
        framebuffer: Framebuffer,
        period: Duration,
    ) -> std::io::Result<(Self, watch::Receiver<Vec<u8>>)> {
        let (frame_tx, frame_rx) = watch::channel(vec![0u8; RASTER_SIZE]);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = thread::Builder::new()
            .name("avc64-refresh".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("refresh runtime failed to start: {e}");
                        return;
                    }
                };
                rt.block_on(async {
                    let mut clock = tokio::time::interval(period);
                    loop {
                        tokio::select! {
                            _ = clock.tick() => {
                                let snapshot = framebuffer
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .to_vec();
                                if frame_tx.send(snapshot).is_err() {
                                    break;
                                }
                            }
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                });
                log::debug!("refresh driver stopped");
            })?;
        Ok((
            Self {
                shutdown,
                handle: Some(handle),
            },
            frame_rx,
        ))
    }

    /// Signals the refresh thread to stop and joins it.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plot_at(chip: &mut Avc64, x: u8, y: u8, value: u8) -> Result<(), EmuError> {
        chip.write(value, VideoMode::SetD1)?;
        chip.write(x, VideoMode::SetX)?;
        chip.write(y, VideoMode::SetY)?;
        chip.write(0, VideoMode::Plot)
    }

    #[test]
    fn test_plot_then_read_back() {
        let mut chip = Avc64::new();
        plot_at(&mut chip, 3, 5, 0x42).unwrap();
        assert_eq!(chip.read(VideoMode::Plot).unwrap(), 0x42);
        let snapshot = chip.snapshot();
        assert_eq!(snapshot[3 + 5 * RASTER_WIDTH], 0x42);
    }

    #[test]
    fn test_clear_fills_whole_framebuffer() {
        let mut chip = Avc64::new();
        chip.write(0xFF, VideoMode::SetD1).unwrap();
        chip.write(0, VideoMode::Clear).unwrap();
        assert!(chip.snapshot().iter().all(|&cell| cell == 0xFF));
    }

    #[test]
    fn test_out_of_bounds_coordinates() {
        let mut chip = Avc64::new();
        chip.write(255, VideoMode::SetX).unwrap();
        chip.write(179, VideoMode::SetY).unwrap();
        assert!(matches!(
            chip.write(0, VideoMode::Plot),
            Err(EmuError::OutOfBoundsCoordinate { x: 255, y: 179 })
        ));

        chip.write(0, VideoMode::SetX).unwrap();
        chip.write(200, VideoMode::SetY).unwrap();
        assert!(matches!(
            chip.read(VideoMode::Plot),
            Err(EmuError::OutOfBoundsCoordinate { .. })
        ));
    }

    #[test]
    fn test_text_mode_unimplemented() {
        let mut chip = Avc64::new();
        assert!(matches!(
            chip.write(0, VideoMode::Text),
            Err(EmuError::UnimplementedMode(VideoMode::Text))
        ));
    }

    #[test]
    fn test_only_plot_is_readable() {
        let chip = Avc64::new();
        assert!(matches!(
            chip.read(VideoMode::SetX),
            Err(EmuError::UnreadableMode(VideoMode::SetX))
        ));
        assert!(matches!(
            chip.read(VideoMode::Clear),
            Err(EmuError::UnreadableMode(VideoMode::Clear))
        ));
    }

    #[test]
    fn test_refresh_driver_publishes_snapshots() {
        let mut chip = Avc64::new();
        plot_at(&mut chip, 0, 0, 0x99).unwrap();

        let (mut driver, mut frames) =
            RefreshDriver::spawn(chip.framebuffer(), Duration::from_millis(1)).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(2), frames.changed())
                .await
                .expect("refresh tick within timeout")
                .expect("refresh driver alive");
        });
        assert_eq!(frames.borrow()[0], 0x99);
        driver.stop();
    }

    #[test]
    fn test_port_offsets_cover_all_modes() {
        for offset in 0..VideoMode::PORT_COUNT {
            assert!(VideoMode::from_port_offset(offset).is_some());
        }
        assert_eq!(VideoMode::from_port_offset(VideoMode::PORT_COUNT), None);
    }
}
