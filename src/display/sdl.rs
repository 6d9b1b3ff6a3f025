//! SDL2 display pump.
//!
//! Runs on the UI thread at a fixed cadence, polling the frame slot and
//! rendering only when a newer frame is present; otherwise the previous
//! frame stays on screen, so a momentary capture stall never flickers.
//! The slot is the pump's only contact with the capture side.

use std::path::Path;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use crate::session::SessionController;
use crate::snapshot::SnapshotFormat;
use crate::source::{Frame, PixelFormat, StreamEndpoint};

/// SDL2 window driven at a fixed tick.
pub struct DisplayPump {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    tick: Duration,
}

impl DisplayPump {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32, tick: Duration) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("camview", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            tick,
        })
    }

    fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        let render_start = Instant::now();

        let sdl_format = match frame.meta.format {
            PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
            PixelFormat::Bgr24 => PixelFormatEnum::BGR24,
        };

        let mut texture = self
            .texture_creator
            .create_texture_streaming(sdl_format, frame.meta.width, frame.meta.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, frame.meta.stride as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas.copy(&texture, None, None).map_err(|e| eyre!(e))?;
        self.canvas.present();

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        metrics::histogram!("frame_latency_ms").record(frame.captured_at.elapsed().as_millis() as f64);
        Ok(())
    }

    /// Drive the window until quit.
    ///
    /// Key bindings: Space start/stop, R restart, S snapshot, Esc quit.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        controller: &SessionController,
        endpoint: StreamEndpoint,
        snapshot_dir: &Path,
        snapshot_format: SnapshotFormat,
    ) -> Result<()> {
        let slot = controller.frame_slot();
        let states = controller.subscribe();
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let mut last_rendered = 0u64;

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("quit requested");
                        break 'running;
                    }
                    Event::KeyDown {
                        keycode: Some(Keycode::Space),
                        ..
                    } => {
                        if controller.current_state().can_start() {
                            if let Err(e) = controller.start(endpoint.clone()) {
                                warn!("start failed: {e}");
                            }
                        } else {
                            controller.stop();
                        }
                    }
                    Event::KeyDown {
                        keycode: Some(Keycode::R),
                        ..
                    } => {
                        if let Err(e) = controller.restart(endpoint.clone()) {
                            warn!("restart failed: {e}");
                        }
                    }
                    Event::KeyDown {
                        keycode: Some(Keycode::S),
                        ..
                    } => match controller.snapshot(snapshot_dir, snapshot_format) {
                        Ok(path) => info!("snapshot saved: {}", path.display()),
                        Err(e) => warn!("snapshot failed: {e}"),
                    },
                    _ => {}
                }
            }

            // Surface every state transition in the window title.
            while let Ok(state) = states.try_recv() {
                let title = format!("camview [{state}]");
                self.canvas.window_mut().set_title(&title)?;
            }

            if let Some((frame, sequence)) = slot.latest() {
                if sequence > last_rendered {
                    self.render_frame(&frame)?;
                    last_rendered = sequence;
                }
            }

            std::thread::sleep(self.tick);
        }

        Ok(())
    }
}
