//! Texfetch - fetch images over HTTP and show them as a grid of textures.
//!
//! The main thread owns the window and the primary context. Fetching happens
//! on the pipeline's worker thread; finished textures are picked up once per
//! frame.

use clap::{Parser, ValueEnum};
use pixels::{Pixels, SurfaceTexture};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use texfetch::config::Config;
use texfetch::decode::{configure_decode_pool, Decoder};
use texfetch::gpu::{ContextGuard, ContextId, ContextProvider, SoftwareGpu};
use texfetch::pipeline::TexturePipeline;
use texfetch::render::render_tiles;
use texfetch::state::{Progress, ViewState};
use texfetch::transport::HttpTransport;
use texfetch::upload::StrategyKind;
use texfetch::world::World;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser, Debug)]
#[command(name = "texfetch")]
#[command(about = "Fetch images in the background and display them as GPU textures", long_about = None)]
struct Args {
    /// Image URLs. A single URL is fetched `--count` times.
    #[arg(required = true)]
    urls: Vec<String>,

    /// Times to fetch a single URL
    #[arg(short, long, default_value_t = 8)]
    count: usize,

    /// Upload strategy to start with
    #[arg(short, long, value_enum, default_value_t = StrategyArg::Serialized)]
    strategy: StrategyArg,

    /// Tiles per row
    #[arg(long)]
    columns: Option<u32>,

    /// Largest edge of a decoded image (0 keeps full resolution)
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Threads used to decode a batch (0 = all cores)
    #[arg(long, default_value_t = 0)]
    decode_threads: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Serialized,
    SharedContext,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Serialized => StrategyKind::Serialized,
            StrategyArg::SharedContext => StrategyKind::SharedContext,
        }
    }
}

/// What to fetch, kept so a reload can issue the same batch again
#[derive(Debug, Clone)]
enum Source {
    Repeat { url: String, count: usize },
    List(Vec<String>),
}

impl Source {
    fn from_args(args: &Args) -> Self {
        match args.urls.as_slice() {
            [url] => Source::Repeat {
                url: url.clone(),
                count: args.count,
            },
            urls => Source::List(urls.to_vec()),
        }
    }

    fn tiles(&self) -> usize {
        match self {
            Source::Repeat { count, .. } => *count,
            Source::List(urls) => urls.len(),
        }
    }

    fn load(&self, pipeline: &TexturePipeline) {
        match self {
            Source::Repeat { url, count } => pipeline.load_textures(*count, url),
            Source::List(urls) => pipeline.load_textures_from_urls(urls),
        }
    }
}

/// Key actions for data-driven input handling
#[derive(Clone, Copy)]
enum KeyAction {
    Reload,
    ToggleStrategy,
    Quit,
}

/// Key binding table - maps physical keys to actions
const KEY_BINDINGS: &[(KeyCode, KeyAction)] = &[
    (KeyCode::KeyR, KeyAction::Reload),
    (KeyCode::F5, KeyAction::Reload),
    (KeyCode::KeyS, KeyAction::ToggleStrategy),
    (KeyCode::Escape, KeyAction::Quit),
    (KeyCode::KeyQ, KeyAction::Quit),
];

fn lookup_key_action(key: KeyCode) -> Option<KeyAction> {
    KEY_BINDINGS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, action)| *action)
}

/// Initialized window state - created once window is ready
struct WindowState {
    window: Arc<Window>,
    pixels: Pixels<'static>,
    view_state: ViewState,
}

impl WindowState {
    fn create(event_loop: &ActiveEventLoop, config: &Config, strategy: StrategyKind) -> Result<Self, Box<dyn Error>> {
        let window_attributes = Window::default_attributes()
            .with_title("Texfetch - Loading...")
            .with_inner_size(LogicalSize::new(
                config.render.default_width,
                config.render.default_height,
            ));

        let window = Arc::new(event_loop.create_window(window_attributes)?);

        let size = window.inner_size();
        let surface_texture = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        let pixels = Pixels::new(size.width, size.height, surface_texture)?;

        Ok(Self {
            window,
            pixels,
            view_state: ViewState::new(size.width, size.height, strategy),
        })
    }

    fn render(&mut self, world: &World, gpu: &SoftwareGpu, ctx: &ContextGuard<'_>, config: &Config) {
        let result = render_tiles(
            world,
            gpu,
            ctx,
            self.pixels.frame_mut(),
            self.view_state.window_width,
            self.view_state.window_height,
            &config.render,
        );
        self.view_state.render_complete(result);

        if let Err(e) = self.pixels.render() {
            log::error!("Frame presentation failed: {}", e);
        }
    }

    fn update_title(&self) {
        self.window.set_title(&self.view_state.title());
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        self.view_state.resize(width, height);
        if let Err(e) = self.pixels.resize_surface(width, height) {
            log::warn!("Surface resize failed: {}", e);
        }
        if let Err(e) = self.pixels.resize_buffer(width, height) {
            log::warn!("Buffer resize failed: {}", e);
        }
    }

    fn control_flow(&self, config: &Config) -> ControlFlow {
        if self.view_state.progress.is_loading() {
            ControlFlow::WaitUntil(Instant::now() + config.render.poll_interval)
        } else if self.view_state.needs_render {
            ControlFlow::Poll
        } else {
            ControlFlow::Wait
        }
    }
}

/// Application with two-phase initialization
struct App {
    config: Config,
    gpu: Arc<SoftwareGpu>,
    primary: ContextId,
    pipeline: TexturePipeline,
    world: World,
    source: Source,
    window_state: Option<WindowState>,
}

impl App {
    fn new(config: Config, gpu: Arc<SoftwareGpu>, primary: ContextId, pipeline: TexturePipeline, source: Source) -> Self {
        let world = World::grid(source.tiles(), config.render.columns);
        source.load(&pipeline);

        Self {
            config,
            gpu,
            primary,
            pipeline,
            world,
            source,
            window_state: None,
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            textured: self.world.textured(),
            tiles: self.world.len(),
            batches_in_flight: self.pipeline.batches_in_flight(),
            decode_failures: self.pipeline.decode_failures(),
        }
    }

    fn reload(&mut self) {
        let ctx = match ContextGuard::assume_current(&*self.gpu, self.primary) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("Cannot reload: {}", e);
                return;
            }
        };

        let released = self.pipeline.release_textures(&ctx, &mut self.world);
        log::info!("Reloading, released {} texture(s)", released);
        self.source.load(&self.pipeline);

        if let Some(ws) = self.window_state.as_mut() {
            ws.view_state.needs_render = true;
        }
    }

    fn toggle_strategy(&mut self) {
        let next = match self.pipeline.active_strategy() {
            StrategyKind::Serialized => StrategyKind::SharedContext,
            StrategyKind::SharedContext => StrategyKind::Serialized,
        };

        match self.pipeline.select_strategy(next) {
            Ok(()) => {
                if let Some(ws) = self.window_state.as_mut() {
                    ws.view_state.set_strategy(next);
                    ws.update_title();
                }
            }
            Err(e) => log::warn!("Strategy unchanged: {}", e),
        }
    }

    fn handle_key_action(&mut self, action: KeyAction, pressed: bool, event_loop: &ActiveEventLoop) {
        if !pressed {
            return;
        }

        match action {
            KeyAction::Reload => self.reload(),
            KeyAction::ToggleStrategy => self.toggle_strategy(),
            KeyAction::Quit => {
                self.pipeline.coordinator().worker().request_shutdown();
                event_loop.exit();
            }
        }
    }

    /// Per-frame work: collect textures, refresh progress, draw if needed
    fn frame(&mut self) {
        let Self {
            config,
            gpu,
            primary,
            pipeline,
            world,
            window_state,
            ..
        } = self;

        let ctx = match ContextGuard::assume_current(&**gpu, *primary) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("Primary context lost: {}", e);
                return;
            }
        };

        pipeline.poll_and_upload(&ctx, world);

        let Some(ws) = window_state.as_mut() else {
            return;
        };

        let progress = Progress {
            textured: world.textured(),
            tiles: world.len(),
            batches_in_flight: pipeline.batches_in_flight(),
            decode_failures: pipeline.decode_failures(),
        };
        if ws.view_state.update_progress(progress) {
            ws.update_title();
        }

        if ws.view_state.needs_render {
            ws.render(world, gpu, &ctx, config);
            ws.window.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window_state.is_some() {
            return;
        }

        let mut ws = match WindowState::create(event_loop, &self.config, self.pipeline.active_strategy()) {
            Ok(ws) => ws,
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        ws.view_state.update_progress(self.progress());
        ws.update_title();
        self.window_state = Some(ws);
        self.frame();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.window_state.is_none() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.pipeline.coordinator().worker().request_shutdown();
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if let Some(action) = lookup_key_action(key) {
                        self.handle_key_action(action, event.state == ElementState::Pressed, event_loop);
                    }
                }
            }

            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                if let Some(ws) = self.window_state.as_mut() {
                    ws.handle_resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.frame(),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.frame();

        if let Some(ws) = self.window_state.as_ref() {
            event_loop.set_control_flow(ws.control_flow(&self.config));
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::default();
    config.upload.strategy = args.strategy.into();
    config.decode.max_parallel_tasks = args.decode_threads;
    if let Some(columns) = args.columns {
        config.render.columns = columns.max(1);
    }
    if let Some(max_dimension) = args.max_dimension {
        config.decode.max_dimension = (max_dimension > 0).then_some(max_dimension);
    }
    configure_decode_pool(&config.decode);

    let source = Source::from_args(&args);
    if source.tiles() == 0 {
        eprintln!("Error: nothing to fetch (--count must be at least 1)");
        std::process::exit(1);
    }

    // The primary context belongs to the main thread for the whole run
    let gpu = Arc::new(SoftwareGpu::new());
    let primary = gpu.create_context(true);
    if let Err(e) = gpu.make_current(Some(primary)) {
        eprintln!("Error: cannot bind primary context: {}", e);
        std::process::exit(1);
    }

    let pipeline = TexturePipeline::new(
        &config,
        Arc::new(HttpTransport::new(&config.fetch)),
        Arc::new(Decoder::new(config.decode.clone())),
        Arc::clone(&gpu) as Arc<dyn ContextProvider>,
        primary,
    )
    .unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let event_loop = EventLoop::new().unwrap_or_else(|e| {
        eprintln!("Error: cannot create event loop: {}", e);
        std::process::exit(1);
    });
    let mut app = App::new(config, gpu, primary, pipeline, source);

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Error: event loop failed: {}", e);
        std::process::exit(1);
    }
}
