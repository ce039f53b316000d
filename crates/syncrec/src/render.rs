//! Plain-text rendering of daemon replies and events.

use chrono::{DateTime, Local, TimeZone};
use syncrec_core::DeviceStatus;
use syncrec_protocol::DaemonMessage;

/// Renders a device listing as an aligned table.
pub fn device_table(devices: &[DeviceStatus]) -> String {
    if devices.is_empty() {
        return "No devices registered".to_string();
    }

    let rows: Vec<[String; 4]> = devices
        .iter()
        .map(|d| {
            [
                format!("{}:{}", d.ip, d.port),
                d.name.clone(),
                d.status.to_string(),
                if d.recording { "REC" } else { "-" }.to_string(),
            ]
        })
        .collect();

    let header = ["DEVICE", "NAME", "STATUS", "RECORDING"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = format_row(&header.map(String::from), &widths);
    for row in &rows {
        out.push('\n');
        out.push_str(&format_row(row, &widths));
    }
    out
}

fn format_row(cells: &[String; 4], widths: &[usize; 4]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

/// One-line summary of a command reply.
pub fn reply(message: &DaemonMessage) -> String {
    match message {
        DaemonMessage::Success { message } => message.clone().unwrap_or_else(|| "OK".to_string()),
        DaemonMessage::DeviceList { devices } => device_table(devices),
        DaemonMessage::ConnectAllComplete { connected, failed } => {
            format!("Connected {connected} device(s), {failed} failed")
        }
        DaemonMessage::RecordingScheduled {
            fire_at,
            lead_time_ms,
            devices,
            transport,
        } => {
            let local = fire_at.with_timezone(&Local);
            let mut line = format!(
                "Recording starts at {} (in {:.1}s) on {devices} device(s)",
                local.format("%H:%M:%S%.3f"),
                *lead_time_ms as f64 / 1000.0
            );
            if *transport {
                line.push_str(" and the transport target");
            }
            line
        }
        DaemonMessage::RecordingStopped {
            stopped,
            failed,
            cancelled,
        } => {
            let mut line = format!("Stopped {stopped} device(s), {failed} failed");
            if *cancelled > 0 {
                line.push_str(&format!(", cancelled {cancelled} pending start action(s)"));
            }
            line
        }
        DaemonMessage::TransportConfig {
            ip: Some(ip),
            port: Some(port),
        } => format!("Transport target: {ip}:{port}"),
        DaemonMessage::TransportConfig { .. } => "Transport target: not set".to_string(),
        DaemonMessage::Pong { seq } => format!("pong {seq}"),
        DaemonMessage::Error { message, code } => match code {
            Some(code) => format!("Error ({code}): {message}"),
            None => format!("Error: {message}"),
        },
        DaemonMessage::Connected { client_id, .. } => format!("Connected as {client_id}"),
        DaemonMessage::Rejected { reason, .. } => format!("Rejected: {reason}"),
        DaemonMessage::DeviceStatus(_) | DaemonMessage::Log { .. } => {
            event_line(message, Local::now()).unwrap_or_default()
        }
    }
}

/// Timestamped line for an event, `None` for anything that is not one.
pub fn event_line<Tz>(message: &DaemonMessage, at: DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let stamp = at.format("%H:%M:%S");
    match message {
        DaemonMessage::DeviceStatus(status) => Some(format!(
            "[{stamp}] {}:{} ({}) {}{}",
            status.ip,
            status.port,
            status.name,
            status.status,
            if status.recording { ", recording" } else { "" }
        )),
        DaemonMessage::Log { message } => Some(format!("[{stamp}] {message}")),
        _ => None,
    }
}
