//! Human-readable dump of a stored gateway snapshot.

use colored::Colorize;
use insteon_core::{Aldb, Node, Plm};
use std::fmt::Write;

fn byte(value: Option<u8>) -> String {
    value.map_or_else(|| "--".to_string(), |v| format!("{v:02X}"))
}

fn link_table(out: &mut String, aldb: &Aldb) {
    if aldb.is_empty() {
        let _ = writeln!(out, "    {}", "(no links)".dimmed());
        return;
    }
    for (key, record) in aldb.get_all() {
        let role = if record.is_controller() { "C" } else { "R" };
        let [d1, d2, d3] = record.data();
        let line = format!(
            "    {}  {} group {:3} {}  data {:02X} {:02X} {:02X}",
            aldb.key_string(key),
            role,
            record.group(),
            record.address(),
            d1,
            d2,
            d3
        );
        if record.in_use() {
            let _ = writeln!(out, "{line}");
        } else {
            let _ = writeln!(out, "{}", line.dimmed());
        }
    }
}

/// Renders the gateway, its link table and its device catalog.
pub fn render(plm: &Plm) -> String {
    let mut out = String::new();
    let gateway = plm.gateway();
    let address = gateway
        .address()
        .map_or_else(|| "unknown address".to_string(), |a| a.to_string());
    let _ = writeln!(out, "{}", format!("Gateway {} ({})", plm.name().cyan(), address).bold());
    for (name, value) in gateway.attributes().iter() {
        let _ = writeln!(out, "  {name}: {value:?}");
    }
    let _ = writeln!(out, "  links:");
    link_table(&mut out, gateway.aldb());

    let count = plm.devices().count();
    let _ = writeln!(out, "\n{}", format!("{count} devices").bold());
    for device in plm.devices() {
        let _ = writeln!(
            out,
            "  {}  cat {} sub {} fw {} engine {}",
            device.address().to_string().cyan(),
            byte(device.dev_cat()),
            byte(device.sub_cat()),
            byte(device.firmware()),
            byte(device.engine_version()),
        );
        link_table(&mut out, device.aldb());
    }

    if plm.x10_devices().next().is_some() {
        let _ = writeln!(out, "\n{}", "X10 devices".bold());
        for device in plm.x10_devices() {
            let status = device.status().unwrap_or("--");
            let _ = writeln!(out, "  {}  {}", device.address().to_string().cyan(), status);
        }
    }
    out
}
