//! Caller-owned application context.
//!
//! The core keeps no global state. Whatever the pick and render-sync entry
//! points need to know about the viewport, the camera and the pointer is
//! passed in through a [`Context`] owned by the application.

use cgmath::{Matrix4, SquareMatrix};
use winit::dpi::{PhysicalPosition, PhysicalSize};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MouseState {
    pub coords: PhysicalPosition<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub size: PhysicalSize<u32>,
    /// Camera projection times view, mapping world space to clip space.
    pub view_proj: Matrix4<f32>,
    pub mouse: MouseState,
}

impl Context {
    /// Viewport of `width` x `height` pixels looking through an identity camera.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: PhysicalSize::new(width, height),
            view_proj: Matrix4::identity(),
            mouse: MouseState::default(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.size = PhysicalSize::new(width, height);
        }
    }

    pub fn set_view_proj(&mut self, view_proj: Matrix4<f32>) {
        self.view_proj = view_proj;
    }

    pub fn set_mouse(&mut self, x: f64, y: f64) {
        self.mouse.coords = PhysicalPosition::new(x, y);
    }
}
