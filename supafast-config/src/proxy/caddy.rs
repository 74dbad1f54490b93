//! Caddyfile rendering.
//!
//! With an https base URL the site block gets automatic certificates and an
//! explicit plaintext site that redirects; with http the site address is
//! prefixed with `http://`, which disables automatic HTTPS for it.

use std::fmt::Write;

use super::{FORWARD_AUTH_PATH, Guard, Route, RoutePlan};

/// Render `plan` as a complete config file.
pub fn render(plan: &RoutePlan) -> String {
    let mut out = String::new();
    out.push_str("# Generated by supafast-init. Re-run the generator instead of editing.\n\n");

    if plan.tls() {
        let _ = writeln!(out, "http://{} {{", plan.host);
        out.push_str("\tredir https://{host}{uri} permanent\n");
        out.push_str("}\n\n");
    }

    let _ = writeln!(out, "{} {{", site_address(plan, &plan.host));
    out.push_str("\tencode zstd gzip\n");
    for route in &plan.routes {
        render_route(&mut out, route, plan.body_limit_mb);
    }
    render_catch_all(&mut out, plan);
    out.push_str("}\n");

    if let Some(portal) = &plan.portal {
        out.push('\n');
        if plan.tls() {
            let _ = writeln!(out, "http://{} {{", portal.host);
            out.push_str("\tredir https://{host}{uri} permanent\n");
            out.push_str("}\n\n");
        }
        let _ = writeln!(out, "{} {{", site_address(plan, &portal.host));
        let _ = writeln!(out, "\treverse_proxy {}", portal.upstream);
        out.push_str("}\n");
    }
    out
}

fn site_address(plan: &RoutePlan, host: &str) -> String {
    if plan.tls() {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn render_route(out: &mut String, route: &Route, body_limit_mb: u32) {
    let directive = if route.strip_prefix {
        "handle_path"
    } else {
        "handle"
    };
    let _ = writeln!(out, "\n\t{directive} {}/* {{", route.prefix);
    if !route.unlimited_body {
        let _ = writeln!(out, "\t\trequest_body {{\n\t\t\tmax_size {body_limit_mb}MB\n\t\t}}");
    }
    if route.streaming {
        // Caddy upgrades websockets natively; keep streams open and unbuffered.
        let _ = writeln!(out, "\t\treverse_proxy {} {{", route.upstream);
        out.push_str("\t\t\tflush_interval -1\n");
        out.push_str("\t\t\tstream_close_delay 5m\n");
        out.push_str("\t\t}\n");
    } else {
        let _ = writeln!(out, "\t\treverse_proxy {}", route.upstream);
    }
    out.push_str("\t}\n");
}

fn render_catch_all(out: &mut String, plan: &RoutePlan) {
    let catch_all = &plan.catch_all;
    out.push_str("\n\thandle {\n");
    let _ = writeln!(
        out,
        "\t\trequest_body {{\n\t\t\tmax_size {}MB\n\t\t}}",
        plan.body_limit_mb
    );
    match &catch_all.guard {
        Guard::BasicAuth {
            username_var,
            hash_var,
        } => {
            out.push_str("\t\tbasic_auth {\n");
            let _ = writeln!(out, "\t\t\t{{${username_var}}} {{${hash_var}}}");
            out.push_str("\t\t}\n");
        }
        Guard::ForwardAuth {
            daemon,
            identity_headers,
        } => {
            let _ = writeln!(out, "\t\tforward_auth {daemon} {{");
            let _ = writeln!(out, "\t\t\turi {FORWARD_AUTH_PATH}");
            let _ = writeln!(
                out,
                "\t\t\tcopy_headers {}",
                identity_headers.join(" ")
            );
            out.push_str("\t\t}\n");
        }
    }
    let _ = writeln!(out, "\t\treverse_proxy {}", catch_all.upstream);
    out.push_str("\t}\n");
}
