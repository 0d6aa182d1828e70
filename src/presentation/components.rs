use crate::domain::models::{ConnectionState, MessageSeverity, StatusMessage};
use eframe::egui;

pub struct Components;

impl Components {
    pub fn card<R>(
        ui: &mut egui::Ui,
        title: &str,
        add_contents: impl FnOnce(&mut egui::Ui) -> R,
    ) -> R {
        let visuals = &ui.style().visuals.widgets.noninteractive;
        let frame = egui::Frame::none()
            .inner_margin(egui::Margin::same(12.0))
            .stroke(visuals.bg_stroke)
            .fill(visuals.bg_fill);

        frame
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(egui::RichText::new(title).strong().size(16.0));
                ui.add_space(6.0);
                add_contents(ui)
            })
            .inner
    }

    /// Full-width strip showing the link state
    pub fn connection_banner(ui: &mut egui::Ui, state: ConnectionState) {
        let (text_color, bg_color) = match state {
            ConnectionState::Connected => {
                (egui::Color32::BLACK, egui::Color32::from_rgb(0, 200, 0))
            }
            ConnectionState::Disconnected => {
                (egui::Color32::WHITE, egui::Color32::from_gray(100))
            }
            ConnectionState::Discovering
            | ConnectionState::Connecting
            | ConnectionState::ResolvingCharacteristics => {
                (egui::Color32::BLACK, egui::Color32::from_rgb(255, 200, 0))
            }
            ConnectionState::Disconnecting => {
                (egui::Color32::WHITE, egui::Color32::from_rgb(120, 90, 0))
            }
        };

        let text = egui::RichText::new(state.to_string().to_uppercase())
            .color(text_color)
            .background_color(bg_color)
            .size(15.0)
            .strong();
        ui.add_sized(
            [ui.available_width(), 30.0],
            egui::Label::new(text).wrap_mode(egui::TextWrapMode::Extend),
        );
    }

    pub fn status_line(ui: &mut egui::Ui, status: &StatusMessage) {
        let color = match status.severity {
            MessageSeverity::Info => ui.visuals().text_color(),
            MessageSeverity::Success => egui::Color32::from_rgb(0, 150, 0),
            MessageSeverity::Warning => egui::Color32::from_rgb(200, 150, 0),
            MessageSeverity::Error => egui::Color32::RED,
        };
        ui.label(egui::RichText::new(&status.message).color(color).strong());
    }

    /// Fixed-width button so the d-pad stays aligned
    pub fn pad_button(ui: &mut egui::Ui, label: &str) -> bool {
        ui.add_sized([96.0, 36.0], egui::Button::new(label)).clicked()
    }
}
