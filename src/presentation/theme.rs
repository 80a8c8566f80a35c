use crate::domain::models::{MessageSeverity, SessionState};
use eframe::egui;

const ACCENT_GREEN: egui::Color32 = egui::Color32::from_rgb(0, 200, 90);
const ACCENT_YELLOW: egui::Color32 = egui::Color32::from_rgb(255, 200, 0);
const ACCENT_RED: egui::Color32 = egui::Color32::from_rgb(230, 60, 60);

/// Square, high-contrast widgets sized for touch
pub fn configure(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    style
        .text_styles
        .iter_mut()
        .for_each(|(text_style, font_id)| {
            font_id.size = match text_style {
                egui::TextStyle::Heading => 26.0,
                egui::TextStyle::Button => 18.0,
                egui::TextStyle::Body => 15.0,
                _ => font_id.size,
            };
        });

    style.spacing.item_spacing = egui::vec2(10.0, 10.0);
    style.spacing.button_padding = egui::vec2(14.0, 10.0);

    let stroke = egui::Stroke::new(2.0, egui::Color32::BLACK);
    for widgets in [
        &mut style.visuals.widgets.noninteractive,
        &mut style.visuals.widgets.inactive,
        &mut style.visuals.widgets.hovered,
        &mut style.visuals.widgets.active,
    ] {
        widgets.bg_stroke = stroke;
        widgets.rounding = egui::Rounding::ZERO;
    }
    style.visuals.widgets.hovered.bg_fill = ACCENT_YELLOW;
    style.visuals.widgets.hovered.fg_stroke = egui::Stroke::new(1.0, egui::Color32::BLACK);
    // Held controls light up
    style.visuals.widgets.active.bg_fill = ACCENT_GREEN;
    style.visuals.widgets.active.fg_stroke = egui::Stroke::new(1.0, egui::Color32::BLACK);

    ctx.set_style(style);
}

/// Banner caption and colors for a session state
pub fn state_banner(state: &SessionState) -> (&'static str, egui::Color32, egui::Color32) {
    match state {
        SessionState::Ready => ("READY", ACCENT_GREEN, egui::Color32::BLACK),
        SessionState::Connecting => ("CONNECTING...", ACCENT_YELLOW, egui::Color32::BLACK),
        SessionState::ServicesDiscovering => {
            ("DISCOVERING SERVICES...", ACCENT_YELLOW, egui::Color32::BLACK)
        }
        SessionState::Reconnecting(_) => ("RECONNECTING...", ACCENT_YELLOW, egui::Color32::BLACK),
        SessionState::Failed(_) => ("ERROR", ACCENT_RED, egui::Color32::WHITE),
        SessionState::Disconnected => (
            "DISCONNECTED",
            egui::Color32::from_gray(100),
            egui::Color32::WHITE,
        ),
    }
}

pub fn severity_color(severity: MessageSeverity) -> egui::Color32 {
    match severity {
        MessageSeverity::Info => egui::Color32::from_rgb(40, 90, 220),
        MessageSeverity::Success => egui::Color32::from_rgb(0, 150, 0),
        MessageSeverity::Warning => egui::Color32::from_rgb(200, 150, 0),
        MessageSeverity::Error => egui::Color32::RED,
    }
}
