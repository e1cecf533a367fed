use httptime::{to_milliseconds, Measurement, Phase, ProbeResult};
use std::fmt::Write as _;
use std::io::Write as _;

fn label(phase: Phase) -> &'static str {
    match phase {
        Phase::SocketOpen => "Socket open",
        Phase::DnsLookup => "DNS lookup",
        Phase::TcpConnection => "TCP connect",
        Phase::TlsHandshake => "TLS handshake",
        Phase::FirstByte => "First byte",
        Phase::ContentTransfer => "Content transfer",
        Phase::SocketClose => "Socket close",
    }
}

pub fn render_text(result: &ProbeResult) -> Result<String, anyhow::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "HTTP/{} {} {}",
        result.http_version, result.status_code, result.status_message
    )?;

    writeln!(out, "\nTime breakdown:")?;
    for (phase, spent) in result.timings.phase_durations()? {
        if phase == Phase::SocketOpen {
            continue;
        }
        writeln!(
            out,
            "  {:<17}{:>8} ms",
            format!("{}:", label(phase)),
            to_milliseconds(spent)
        )?;
    }
    writeln!(
        out,
        "  {:<17}{:>8} ms",
        "Total time:",
        to_milliseconds(result.timings.total()?)
    )?;

    if let Some(headers) = result.headers.as_ref() {
        writeln!(out, "\nHeaders:")?;
        for (name, value) in headers.iter() {
            writeln!(out, "  {}: {}", name, value)?;
        }
    }
    if let Some(body) = result.response.as_ref() {
        writeln!(out, "\n{}", String::from_utf8_lossy(body))?;
    }
    Ok(out)
}

pub fn print_result(result: &ProbeResult, json: bool) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", render_text(result)?);
    }
    std::io::stdout().flush()?;
    Ok(())
}

pub fn print_measurement(measurement: &Measurement, json: bool) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(measurement)?);
        std::io::stdout().flush()?;
        return Ok(());
    }
    match measurement {
        Measurement::Single(result) => print_result(result, false),
        Measurement::Runs(results) => {
            for (i, result) in results.iter().enumerate() {
                println!("Request {}/{}", i + 1, results.len());
                print!("{}", render_text(result)?);
                println!();
            }
            std::io::stdout().flush()?;
            Ok(())
        }
    }
}
