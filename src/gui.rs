use crate::{
    controls::{Action, ViewMode},
    loader::ScanLoader,
    player::Player,
    timing::{FrameTiming, TimingLog},
};
use anyhow::Result;
use kiss3d::{
    camera::{ArcBall, Camera},
    event::{Action as KeyAction, Key, WindowEvent},
    planar_camera::PlanarCamera,
    post_processing::PostProcessingEffect,
    text::Font,
    window::{State, Window},
};
use kiss3d_utils::WindowPlotExt;
use nalgebra::{Point2, Point3, Vector3};
use std::{
    fs::File,
    rc::Rc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

const TEXT_COLOR: [f32; 3] = [0.0, 204.0, 0.0];
const AXIS_LENGTH: f32 = 10.0;
const CAMERA_STEP: f32 = 0.05;

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub semantics: bool,
    pub instances: bool,
    pub debug_auto: bool,
    pub verbose_runtime: bool,
    pub interval: Duration,
    /// Distance between the raw and semantic clouds in the split view.
    pub panel_gap: f32,
}

pub struct App {
    player: Player,
    timing_log: Option<TimingLog<File>>,
    view: ViewMode,
    camera: ArcBall,
    font: Rc<Font>,
    options: AppOptions,
}

impl State for App {
    fn step(&mut self, window: &mut Window) {
        let result = self.try_step(window);
        if let Err(err) = result {
            error!("{err:#}");
            window.close();
        }
    }

    fn cameras_and_effect(
        &mut self,
    ) -> (
        Option<&mut dyn Camera>,
        Option<&mut dyn PlanarCamera>,
        Option<&mut dyn PostProcessingEffect>,
    ) {
        (Some(&mut self.camera), None, None)
    }
}

impl App {
    /// Loads the first frame.
    pub fn build(
        loader: ScanLoader,
        timing_log: Option<TimingLog<File>>,
        options: AppOptions,
    ) -> Result<Self> {
        let eye = Point3::from([0.0f32, -80.0, 32.0]);
        let at = Point3::origin();
        let mut camera = ArcBall::new(eye, at);
        camera.set_up_axis(Vector3::from([0.0, 0.0, 1.0]));

        Ok(Self {
            player: Player::new(loader, options.interval)?,
            timing_log,
            view: ViewMode::initial(options.semantics),
            camera,
            font: Font::default(),
            options,
        })
    }

    fn try_step(&mut self, window: &mut Window) -> Result<()> {
        let action = self.poll_events(window);
        if action == Action::Quit {
            info!("quit");
            window.close();
            return Ok(());
        }

        if action == Action::CycleView {
            self.view = self
                .view
                .cycle(self.options.semantics, self.options.instances);
            debug!(view = self.view.label(), "switched view");
        }
        self.player.update(action, Instant::now())?;
        self.render(window)?;
        Ok(())
    }

    fn poll_events(&mut self, window: &mut Window) -> Action {
        let debug_auto = self.options.debug_auto;
        let mut action = Action::No;

        window.events().iter().for_each(|event| {
            use Key as K;
            use KeyAction as A;
            use WindowEvent as E;

            match event.value {
                E::Key(K::Left, A::Release, _) => {
                    let curr_yaw = self.camera.yaw();
                    self.camera.set_yaw(curr_yaw - CAMERA_STEP);
                }
                E::Key(K::Right, A::Release, _) => {
                    let curr_yaw = self.camera.yaw();
                    self.camera.set_yaw(curr_yaw + CAMERA_STEP);
                }
                E::Key(K::Down, A::Release, _) => {
                    self.camera.set_pitch(self.camera.pitch() - CAMERA_STEP);
                }
                E::Key(K::Up, A::Release, _) => {
                    self.camera.set_pitch(self.camera.pitch() + CAMERA_STEP);
                }
                E::Key(key, A::Press, _) => {
                    action = action.merge(Action::from_key(key, debug_auto));
                }
                _ => {}
            }
        });

        action
    }

    fn render(&mut self, window: &mut Window) -> Result<()> {
        let pending_load = self.player.take_pending_load();
        let Some(frame) = self.player.frame() else {
            return Ok(());
        };

        let (raw_origin, sem_origin) = match self.view {
            ViewMode::Split => {
                let half = self.options.panel_gap / 2.0;
                (Vector3::new(-half, 0.0, 0.0), Vector3::new(half, 0.0, 0.0))
            }
            _ => (Vector3::zeros(), Vector3::zeros()),
        };

        let raw_start = Instant::now();
        if matches!(self.view, ViewMode::Split | ViewMode::Raw) {
            draw_cloud(window, &frame.points, &frame.range_colors, &raw_origin);
            window.draw_axes(Point3::from(raw_origin), AXIS_LENGTH);
        }
        let plot_raw = raw_start.elapsed();

        let sem_start = Instant::now();
        let sem_colors = match self.view {
            ViewMode::Split | ViewMode::Semantic => Some(&frame.semantic_colors),
            ViewMode::Instance => frame.instance_colors.as_ref(),
            ViewMode::Raw => None,
        };
        if let Some(colors) = sem_colors {
            draw_cloud(window, &frame.points, colors, &sem_origin);
            window.draw_axes(Point3::from(sem_origin), AXIS_LENGTH);
        }
        let plot_sem = sem_start.elapsed();

        if let Some(load) = pending_load {
            let timing = FrameTiming::new(frame.len(), load, plot_raw, plot_sem);
            if self.options.verbose_runtime {
                info!(
                    points = timing.points,
                    load_data = timing.load_data,
                    plot_raw = timing.plot_raw,
                    plot_semantic = timing.plot_sem,
                    total = timing.total(),
                    "visualizing {} points",
                    timing.points
                );
            }
            if let Some(log) = &mut self.timing_log {
                log.record(&timing)?;
            }
        }

        let position = self.player.position().map(|pos| pos + 1).unwrap_or(0);
        window.draw_text(
            &format!(
                "Scan {position}/{}, name: {}, points: {}",
                self.player.scan_count(),
                frame.name,
                frame.len()
            ),
            &Point2::from([5.0; 2]),
            40.0,
            &self.font,
            &Point3::from(TEXT_COLOR),
        );
        window.draw_text(
            &format!(
                "View: {}{}",
                self.view.label(),
                if self.player.is_playing() {
                    ", playing"
                } else {
                    ""
                }
            ),
            &Point2::from([5.0, 55.0]),
            40.0,
            &self.font,
            &Point3::from(TEXT_COLOR),
        );

        Ok(())
    }
}

fn draw_cloud(
    window: &mut Window,
    points: &[Point3<f32>],
    colors: &[Point3<f32>],
    origin: &Vector3<f32>,
) {
    points
        .iter()
        .zip(colors)
        .for_each(|(point, color)| window.draw_point(&(point + origin), color));
}
