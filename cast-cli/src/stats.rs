//! Statistics display and formatting

use crate::sim::{SimSnapshot, SimSummary};
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format RTT in human-readable form
pub fn format_rtt(rtt: Duration) -> String {
    let rtt_us = rtt.as_micros();
    if rtt_us >= 1_000_000 {
        format!("{:.2}s", rtt_us as f64 / 1_000_000.0)
    } else if rtt_us >= 1_000 {
        format!("{:.2}ms", rtt_us as f64 / 1_000.0)
    } else {
        format!("{}µs", rtt_us)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Packet loss as a percentage of packets put on the link
pub fn loss_rate(snapshot: &SimSnapshot) -> f64 {
    if snapshot.link.packets_sent == 0 {
        0.0
    } else {
        snapshot.link.packets_lost as f64 * 100.0 / snapshot.link.packets_sent as f64
    }
}

/// Display the end-of-run summary
pub fn display_summary(summary: &SimSummary) {
    let last = &summary.last;
    let sender = &last.sender;
    let link = &last.link;
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SENDER STATISTICS ({:?})                                   ", summary.media);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Elapsed:  {}", format_duration(last.elapsed));
    println!(
        "│ Frames:   {} submitted / {} encoded / {} dropped / {} failed",
        sender.frames_submitted, sender.frames_encoded, sender.frames_dropped, sender.encode_failures
    );
    println!(
        "│ Sent:     {} at {}",
        format_bytes(sender.bytes_sent),
        format_bandwidth(sender.current_bitrate as u64)
    );
    println!(
        "│ Feedback: {} acks / {} duplicate / {} out of order",
        sender.acks_received, sender.duplicate_acks, sender.out_of_order_acks
    );
    println!(
        "│ Resends:  {} NACK-driven / {} kickstarts",
        sender.nack_resends, sender.kickstarts
    );
    println!("│ Reports:  {}", sender.reports_sent);
    println!("│ RTT:      {}", format_rtt(last.round_trip_time));
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ LINK STATISTICS                                             │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Packets:  {} sent / {} lost ({:.2}%) / {} retransmitted",
        link.packets_sent,
        link.packets_lost,
        loss_rate(last),
        link.packets_retransmitted
    );
    println!(
        "│ Receiver: {} frames completed / {} feedback messages",
        link.frames_completed, link.feedback_sent
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(snapshot: &SimSnapshot) {
    let elapsed = snapshot.elapsed.as_secs();
    let throughput_bps = if elapsed > 0 {
        (snapshot.sender.bytes_sent * 8) / elapsed
    } else {
        0
    };

    print!(
        "\r[{:8}] Frames: {} | In flight: {} | Rate: {} | Target: {} | RTT: {} | Loss: {:.1}%         ",
        format_duration(snapshot.elapsed),
        snapshot.sender.frames_encoded,
        snapshot.frames_in_flight,
        format_bandwidth(throughput_bps),
        format_bandwidth(snapshot.sender.current_bitrate as u64),
        format_rtt(snapshot.round_trip_time),
        loss_rate(snapshot)
    );

    // A failed flush only delays the status line
    let _ = std::io::stdout().flush();
}
