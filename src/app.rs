//! Window application holding the wgpu graphics context
//!
//! Uploads the session canvas to a GPU texture every frame, presents it
//! letterboxed next to the garment catalog panel, and routes catalog clicks
//! back into the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::catalog::load_thumbnail;
use crate::config::TryOnConfig;
use crate::render::Tick;
use crate::session::TryOnSession;

/// Longest edge of a catalog card preview
const THUMBNAIL_EDGE: u32 = 96;

/// Quad placement for the present shader, in clip space
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PresentParams {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl PresentParams {
    /// Fit a `canvas` sized image into `area` (x, y, width, height in window
    /// pixels) without distortion, centered
    pub fn letterbox(canvas: (u32, u32), area: [f32; 4], window: (u32, u32)) -> Self {
        let [area_x, area_y, area_w, area_h] = area;
        let (window_w, window_h) = (window.0.max(1) as f32, window.1.max(1) as f32);
        let aspect = canvas.0.max(1) as f32 / canvas.1.max(1) as f32;

        let (quad_w, quad_h) = if area_h <= 0.0 || area_w <= 0.0 {
            (0.0, 0.0)
        } else if area_w / area_h > aspect {
            (area_h * aspect, area_h)
        } else {
            (area_w, area_w / aspect)
        };

        let center_x = area_x + area_w / 2.0;
        let center_y = area_y + area_h / 2.0;

        Self {
            scale: [quad_w / window_w, quad_h / window_h],
            offset: [center_x / window_w * 2.0 - 1.0, 1.0 - center_y / window_h * 2.0],
        }
    }
}

/// Garment card shown in the catalog panel
struct GarmentCard {
    name: String,
    thumbnail: Option<egui::TextureHandle>,
}

/// User actions collected while the UI runs
#[derive(Default)]
struct UiActions {
    select: Option<usize>,
}

/// Main application state
pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    /// The wgpu device for creating GPU resources
    device: wgpu::Device,
    /// The command queue for submitting GPU work
    queue: wgpu::Queue,
    /// Surface configuration
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    /// Camera, pose worker, catalog and canvas
    session: TryOnSession,

    // Canvas presentation
    canvas_texture: Option<wgpu::Texture>,
    canvas_bind_group: Option<wgpu::BindGroup>,
    present_pipeline: wgpu::RenderPipeline,
    present_bind_group_layout: wgpu::BindGroupLayout,
    present_params_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    cards: Vec<GarmentCard>,
}

impl App {
    /// Create the graphics context and start the try-on session
    pub async fn new(window: Arc<Window>, tryon_config: TryOnConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("Failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to find suitable GPU adapter")?;

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Virtual Try-On Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .context("Failed to create device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .context("Surface reports no supported formats")?;

        log::info!("Surface format: {:?}", surface_format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Canvas Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let present_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/present.wgsl").into()),
        });

        let present_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Present Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let present_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&present_bind_group_layout],
            push_constant_ranges: &[],
        });

        let present_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&present_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &present_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &present_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let present_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Present Params Buffer"),
            size: std::mem::size_of::<PresentParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        // Catalog, camera, render loop, pose model
        let mut session = TryOnSession::new(tryon_config).context("Failed to build garment catalog")?;
        let cards = load_cards(&egui_ctx, &session);
        if let Err(e) = session.start_default(Instant::now()) {
            log::error!("Startup halted: {}", e);
        }

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            session,
            canvas_texture: None,
            canvas_bind_group: None,
            present_pipeline,
            present_bind_group_layout,
            present_params_buffer,
            sampler,
            egui_ctx,
            egui_state,
            egui_renderer,
            cards,
        })
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Whether a frame is due
    pub fn poll(&mut self, now: Instant) -> Tick {
        self.session.poll(now)
    }

    pub fn frame_duration(&self) -> Duration {
        self.session.frame_duration()
    }

    pub fn select_garment(&mut self, index: usize) {
        if let Err(e) = self.session.select_garment(index) {
            log::warn!("{}", e);
        }
    }

    pub fn select_next(&mut self) {
        self.session.select_next();
    }

    pub fn select_previous(&mut self) {
        self.session.select_previous();
    }

    pub fn deselect(&mut self) {
        self.session.deselect();
    }

    /// Stop the session's worker threads
    pub fn shutdown(&mut self) {
        self.session.stop();
    }

    /// Run the render step (if the loop is running) and present the result
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        if self.session.is_render_loop_running() {
            self.session.update();
            self.session.render_frame(Instant::now());
        }
        self.upload_canvas();

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        // Build the UI first so the canvas can be fitted into the space it leaves
        let raw_input = self.egui_state.take_egui_input(&self.window);
        let mut actions = UiActions::default();
        let mut canvas_area = egui::Rect::NOTHING;
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            canvas_area = draw_ui(ctx, &self.session, &self.cards, &mut actions);
        });

        let pixels_per_point = full_output.pixels_per_point;
        let params = PresentParams::letterbox(
            (self.session.canvas().width(), self.session.canvas().height()),
            [
                canvas_area.min.x * pixels_per_point,
                canvas_area.min.y * pixels_per_point,
                canvas_area.width() * pixels_per_point,
                canvas_area.height() * pixels_per_point,
            ],
            (self.config.width, self.config.height),
        );
        self.queue
            .write_buffer(&self.present_params_buffer, 0, bytemuck::bytes_of(&params));

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(bind_group) = &self.canvas_bind_group {
                render_pass.set_pipeline(&self.present_pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..6, 0..1);
            }
        }

        self.paint_ui(&mut encoder, &view, full_output);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        if let Some(index) = actions.select {
            self.select_garment(index);
        }

        Ok(())
    }

    /// Copy the session canvas into its GPU texture, recreating it on size change
    fn upload_canvas(&mut self) {
        let canvas = self.session.canvas();
        let (width, height) = (canvas.width(), canvas.height());

        let needs_new_texture = match &self.canvas_texture {
            None => true,
            Some(texture) => {
                let size = texture.size();
                size.width != width || size.height != height
            }
        };

        if needs_new_texture {
            log::info!("Creating canvas texture: {}x{}", width, height);

            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Canvas Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Canvas Bind Group"),
                layout: &self.present_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.present_params_buffer.as_entire_binding(),
                    },
                ],
            });

            self.canvas_texture = Some(texture);
            self.canvas_bind_group = Some(bind_group);
        }

        if let Some(texture) = &self.canvas_texture {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                canvas.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn paint_ui(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        full_output: egui::FullOutput,
    ) {
        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer
                .render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

/// Load card previews; a garment whose image fails to load gets a text-only card
fn load_cards(ctx: &egui::Context, session: &TryOnSession) -> Vec<GarmentCard> {
    session
        .state()
        .catalog
        .iter()
        .map(|garment| {
            let thumbnail = match load_thumbnail(&garment.image, THUMBNAIL_EDGE) {
                Ok(image) => {
                    let size = [image.width() as usize, image.height() as usize];
                    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw());
                    Some(ctx.load_texture(
                        format!("garment-{}", garment.id),
                        color_image,
                        egui::TextureOptions::LINEAR,
                    ))
                }
                Err(e) => {
                    log::warn!("No preview for '{}': {}", garment.name, e);
                    None
                }
            };
            GarmentCard {
                name: garment.name.clone(),
                thumbnail,
            }
        })
        .collect()
}

/// Lay out the panels; returns the rect left over for the canvas
fn draw_ui(
    ctx: &egui::Context,
    session: &TryOnSession,
    cards: &[GarmentCard],
    actions: &mut UiActions,
) -> egui::Rect {
    let mode = session
        .last_report()
        .placement
        .map(|p| format!("{:?}", p.mode))
        .unwrap_or_else(|| "None".to_string());

    egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
        ui.horizontal(|ui| {
            ui.label("Virtual Try-On");
            ui.separator();
            ui.label(format!("FPS: {:.1}", session.stats().fps()));
            ui.separator();
            ui.label(format!("Placement: {}", mode));
            ui.separator();
            ui.label(format!("Pose frames skipped: {}", session.dropped_pose_frames()));
        });
    });

    egui::SidePanel::right("garments")
        .resizable(false)
        .min_width(THUMBNAIL_EDGE as f32 + 48.0)
        .show(ctx, |ui| {
            ui.heading("Dresses");
            if let Some(status) = session.status_text() {
                ui.label(status);
            }
            ui.separator();

            egui::ScrollArea::vertical().show(ui, |ui| {
                let catalog = &session.state().catalog;
                for (index, card) in cards.iter().enumerate() {
                    let selected = catalog.is_selected(index);
                    ui.vertical_centered(|ui| {
                        if let Some(thumbnail) = &card.thumbnail {
                            let image = egui::Image::new(thumbnail)
                                .max_size(egui::vec2(THUMBNAIL_EDGE as f32, THUMBNAIL_EDGE as f32));
                            if ui.add(egui::ImageButton::new(image).selected(selected)).clicked() {
                                actions.select = Some(index);
                            }
                        }
                        if ui.selectable_label(selected, &card.name).clicked() {
                            actions.select = Some(index);
                        }
                    });
                    ui.add_space(8.0);
                }
            });
        });

    ctx.available_rect()
}
