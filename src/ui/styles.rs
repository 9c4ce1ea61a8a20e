//! # UI Styling Module
//!
//! Button styles shared by the sidebar and the listening panel.

use iced::widget::button;
use iced::{Background, Border, Color};

fn filled(background: Color, border: Color, border_width: f32, text_color: Color) -> button::Style {
    button::Style {
        background: Some(Background::Color(background)),
        text_color,
        border: Border {
            color: border,
            width: border_width,
            radius: 4.0.into(),
        },
        ..Default::default()
    }
}

fn gray(level: f32) -> Color {
    Color::from_rgb(level, level, level)
}

/// Style for device entries; the peripheral being listened to is highlighted
pub fn device_button_style(is_target: bool) -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    move |_theme: &iced::Theme, status: button::Status| {
        // Teal for the current target, gray otherwise
        let (base, edge, width) = if is_target {
            ((0.2, 0.6, 0.7), (0.3, 0.7, 0.8), 2.0)
        } else {
            ((0.4, 0.4, 0.4), (0.5, 0.5, 0.5), 1.0)
        };
        let shade = |(r, g, b): (f32, f32, f32), delta: f32| {
            Color::from_rgb(r + delta, g + delta, b + delta)
        };

        match status {
            button::Status::Active => filled(shade(base, 0.0), shade(edge, 0.0), width, Color::WHITE),
            button::Status::Hovered => filled(shade(base, 0.1), shade(edge, 0.1), width, Color::WHITE),
            button::Status::Pressed => filled(shade(base, -0.05), shade(edge, -0.1), width, Color::WHITE),
            // Entries have no press action, so Disabled is their resting look.
            button::Status::Disabled => filled(shade(base, 0.0), shade(edge, 0.0), width, Color::WHITE),
        }
    }
}

/// Style for the per-device listen action (green theme)
pub fn listen_button_style() -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    |_theme: &iced::Theme, status: button::Status| match status {
        button::Status::Active => filled(
            Color::from_rgb(0.2, 0.7, 0.2),
            Color::from_rgb(0.3, 0.8, 0.3),
            1.0,
            Color::WHITE,
        ),
        button::Status::Hovered => filled(
            Color::from_rgb(0.3, 0.8, 0.3),
            Color::from_rgb(0.4, 0.9, 0.4),
            1.0,
            Color::WHITE,
        ),
        button::Status::Pressed => filled(
            Color::from_rgb(0.15, 0.6, 0.15),
            Color::from_rgb(0.2, 0.7, 0.2),
            1.0,
            Color::WHITE,
        ),
        button::Status::Disabled => filled(gray(0.3), gray(0.4), 1.0, gray(0.6)),
    }
}

/// Style for the stop button of the listening panel (red theme)
pub fn stop_button_style() -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    |_theme: &iced::Theme, status: button::Status| match status {
        button::Status::Active => filled(
            Color::from_rgb(0.69, 0.0, 0.13),
            Color::from_rgb(0.8, 0.1, 0.2),
            1.0,
            Color::WHITE,
        ),
        button::Status::Hovered => filled(
            Color::from_rgb(0.8, 0.1, 0.2),
            Color::from_rgb(0.9, 0.2, 0.3),
            1.0,
            Color::WHITE,
        ),
        button::Status::Pressed => filled(
            Color::from_rgb(0.55, 0.0, 0.1),
            Color::from_rgb(0.69, 0.0, 0.13),
            1.0,
            Color::WHITE,
        ),
        button::Status::Disabled => filled(gray(0.3), gray(0.4), 1.0, gray(0.6)),
    }
}
