//! LoRa bridge simulation over lossy air

use anyhow::Result;
use colored::Colorize;
use loratap_radio::LoraMode;
use loratap_sim::scenarios::{self, Scenario};
use loratap_sim::SimulationPresets;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "LoRa TAP Bridge Simulation".bright_blue().bold());
    println!("{}", "==========================".bright_blue());

    println!("\n{}", "Time on air for a 200 byte DATA frame".bright_yellow());
    for encrypted in [false, true] {
        for (mode, airtime) in scenarios::airtime_table(200, encrypted) {
            println!(
                "  {:<10} {:<10} {:?}",
                format!("{:?}", mode),
                if encrypted { "encrypted" } else { "plaintext" },
                airtime
            );
        }
    }

    let presets = [
        ("Ideal Conditions", SimulationPresets::ideal_conditions()),
        ("Good Conditions", SimulationPresets::good_conditions()),
        ("Average Conditions", SimulationPresets::average_conditions()),
        ("Poor Conditions", SimulationPresets::poor_conditions()),
    ];

    for (name, conditions) in presets {
        for mode in [LoraMode::LongFast, LoraMode::ShortSlow] {
            println!("{}", format!("\n>>> {} / {:?}", name, mode).bright_green().bold());
            let scenario = Scenario::new(conditions.clone(), mode);
            println!("Packet Loss: {}%", (conditions.packet_loss * 100.0) as u32);
            println!("Latency: {:?}", conditions.latency);
            println!("ACK timeout: {:?}, {} attempts", scenario.ack_timeout(), scenario.attempts);

            let report = scenarios::ping_pong(&scenario).await?;
            let rate = format!("{:.0}%", report.ack_rate() * 100.0);
            let rate = if report.acked == report.rounds {
                rate.bright_green()
            } else {
                rate.bright_red()
            };
            println!(
                "Acked {}/{} ({}), {} response(s), {} transmission(s)",
                report.acked, report.rounds, rate, report.responses, report.transmissions
            );
            println!(
                "Air: {} sent, {} dropped, {} delivered in {:?}",
                report.frames_sent, report.frames_dropped, report.frames_delivered, report.elapsed
            );
            println!("{}", "-".repeat(50));
        }
    }

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
