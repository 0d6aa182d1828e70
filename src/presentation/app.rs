use crate::domain::models::{MotionCommand, StatusMessage};
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::bluetooth::BluetoothService;
use crate::infrastructure::logging::LoggingGuard;
use crate::presentation::components::Components;
use eframe::egui;
use std::time::Duration;

const KEY_BINDINGS: [(egui::Key, MotionCommand); 5] = [
    (egui::Key::ArrowUp, MotionCommand::Forward),
    (egui::Key::ArrowDown, MotionCommand::Back),
    (egui::Key::ArrowLeft, MotionCommand::Left),
    (egui::Key::ArrowRight, MotionCommand::Right),
    (egui::Key::Space, MotionCommand::Switch),
];

pub struct ControllerApp<T: Transport> {
    bluetooth: BluetoothService<T>,
    status: StatusMessage,
    is_shut_down: bool,

    // Logging guard
    _logging_guard: Option<LoggingGuard>,
}

impl<T: Transport> ControllerApp<T> {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        bluetooth: BluetoothService<T>,
        logging_guard: Option<LoggingGuard>,
    ) -> Self {
        Self {
            bluetooth,
            status: StatusMessage::info("Not connected"),
            is_shut_down: false,
            _logging_guard: logging_guard,
        }
    }

    fn send(&self, command: MotionCommand) {
        self.bluetooth.request_send(command.as_str());
    }

    fn handle_keyboard(&self, ctx: &egui::Context) {
        for (key, command) in KEY_BINDINGS {
            if ctx.input(|i| i.key_pressed(key)) {
                self.send(command);
            }
        }
    }

    fn ui_status_panel(&self, ui: &mut egui::Ui) {
        Components::card(ui, "Status", |ui| {
            Components::connection_banner(ui, self.bluetooth.connection_state());
            ui.add_space(4.0);
            Components::status_line(ui, &self.status);
        });
    }

    fn ui_control_pad(&self, ui: &mut egui::Ui) {
        Components::card(ui, "Drive", |ui| {
            egui::Grid::new("control_pad")
                .spacing([8.0, 8.0])
                .show(ui, |ui| {
                    ui.label("");
                    if Components::pad_button(ui, "Forward") {
                        self.send(MotionCommand::Forward);
                    }
                    ui.label("");
                    ui.end_row();

                    if Components::pad_button(ui, "Left") {
                        self.send(MotionCommand::Left);
                    }
                    if Components::pad_button(ui, "Switch") {
                        self.send(MotionCommand::Switch);
                    }
                    if Components::pad_button(ui, "Right") {
                        self.send(MotionCommand::Right);
                    }
                    ui.end_row();

                    ui.label("");
                    if Components::pad_button(ui, "Back") {
                        self.send(MotionCommand::Back);
                    }
                    ui.label("");
                    ui.end_row();
                });
        });
    }

    fn ui_connection_buttons(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Reconnect").clicked() {
                self.bluetooth.request_connect();
            }
            if ui.button("Disconnect").clicked() {
                self.bluetooth.request_disconnect();
            }
        });
    }
}

impl<T: Transport> eframe::App for ControllerApp<T> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let mut latest = None;
        self.bluetooth.poll(|status| latest = Some(status.clone()));
        if let Some(status) = latest {
            self.status = status;
        }

        self.handle_keyboard(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading(format!("{} Controller", self.bluetooth.device_name()));
                ui.add_space(10.0);
                self.ui_status_panel(ui);
                ui.add_space(10.0);
                self.ui_control_pad(ui);
                ui.add_space(10.0);
                self.ui_connection_buttons(ui);
            });
        });

        // Results arrive from the worker without any input event
        ctx.request_repaint_after(Duration::from_millis(100));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if !self.is_shut_down {
            self.is_shut_down = true;
            if !self.bluetooth.shutdown() {
                tracing::warn!("Background worker left running at exit");
            }
        }
    }
}
