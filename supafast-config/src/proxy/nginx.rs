//! nginx.conf rendering.
//!
//! Certificates for an https base URL are read from
//! `/etc/nginx/certs/<host>/{fullchain,privkey}.pem`; obtaining them is left
//! to the operator.

use std::fmt::Write;

use crate::compose::patches::HTPASSWD_PATH;

use super::{AUTH_REQUEST_PATH, Guard, PortalSite, Route, RoutePlan, Upstream};

const AUTHZ_LOCATION: &str = "/internal/authelia/authz";

/// Render `plan` as a complete config file.
pub fn render(plan: &RoutePlan) -> String {
    let mut out = String::new();
    out.push_str("# Generated by supafast-init. Re-run the generator instead of editing.\n");
    out.push_str("worker_processes auto;\n\n");
    out.push_str("events {\n    worker_connections 1024;\n}\n\n");
    out.push_str("http {\n");
    out.push_str("    map $http_upgrade $connection_upgrade {\n");
    out.push_str("        default upgrade;\n");
    out.push_str("        ''      close;\n");
    out.push_str("    }\n\n");

    out.push_str("    server_tokens off;\n");
    out.push_str("    sendfile on;\n");
    let _ = writeln!(out, "    client_max_body_size {}m;\n", plan.body_limit_mb);

    render_upstream(&mut out, &Upstream::GATEWAY);
    render_upstream(&mut out, &plan.catch_all.upstream);
    if let Guard::ForwardAuth { daemon, .. } = &plan.catch_all.guard {
        render_upstream(&mut out, daemon);
    }

    if plan.tls() {
        render_redirect(&mut out, &plan.host);
    }
    open_server(&mut out, plan, &plan.host);
    for route in &plan.routes {
        render_route(&mut out, route);
    }
    render_catch_all(&mut out, plan);
    out.push_str("    }\n");

    if let Some(portal) = &plan.portal {
        if plan.tls() {
            render_redirect(&mut out, &portal.host);
        }
        render_portal(&mut out, plan, portal);
    }

    out.push_str("}\n");
    out
}

fn upstream_name(upstream: &Upstream) -> String {
    format!("{}_upstream", upstream.service)
}

fn render_upstream(out: &mut String, upstream: &Upstream) {
    let _ = writeln!(out, "    upstream {} {{", upstream_name(upstream));
    let _ = writeln!(out, "        server {upstream};");
    out.push_str("    }\n\n");
}

fn render_redirect(out: &mut String, host: &str) {
    out.push_str("    server {\n");
    out.push_str("        listen 80;\n");
    let _ = writeln!(out, "        server_name {host};");
    out.push_str("        return 301 https://$host$request_uri;\n");
    out.push_str("    }\n\n");
}

fn open_server(out: &mut String, plan: &RoutePlan, host: &str) {
    out.push_str("    server {\n");
    if plan.tls() {
        out.push_str("        listen 443 ssl;\n");
        out.push_str("        http2 on;\n");
        let _ = writeln!(out, "        server_name {host};");
        let _ = writeln!(
            out,
            "        ssl_certificate /etc/nginx/certs/{host}/fullchain.pem;"
        );
        let _ = writeln!(
            out,
            "        ssl_certificate_key /etc/nginx/certs/{host}/privkey.pem;"
        );
        out.push_str("        ssl_protocols TLSv1.2 TLSv1.3;\n");
    } else {
        out.push_str("        listen 80;\n");
        let _ = writeln!(out, "        server_name {host};");
    }
}

/// Headers repeated per location; nginx drops inherited `proxy_set_header`
/// directives once a location sets any of its own.
fn proxy_headers(out: &mut String, indent: &str) {
    for line in [
        "proxy_set_header Host $host;",
        "proxy_set_header X-Real-IP $remote_addr;",
        "proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;",
        "proxy_set_header X-Forwarded-Proto $scheme;",
    ] {
        let _ = writeln!(out, "{indent}{line}");
    }
}

fn render_route(out: &mut String, route: &Route) {
    let _ = writeln!(out, "\n        location {}/ {{", route.prefix);
    let target = upstream_name(&route.upstream);
    if route.strip_prefix {
        let _ = writeln!(out, "            proxy_pass http://{target}/;");
    } else {
        let _ = writeln!(out, "            proxy_pass http://{target};");
    }
    proxy_headers(out, "            ");
    if route.streaming {
        out.push_str("            proxy_http_version 1.1;\n");
        out.push_str("            proxy_set_header Upgrade $http_upgrade;\n");
        out.push_str(
            "            proxy_set_header Connection $connection_upgrade;\n",
        );
        out.push_str("            proxy_read_timeout 3600s;\n");
        out.push_str("            proxy_buffering off;\n");
    }
    if route.unlimited_body {
        out.push_str("            client_max_body_size 0;\n");
        out.push_str("            proxy_request_buffering off;\n");
    }
    out.push_str("        }\n");
}

fn render_catch_all(out: &mut String, plan: &RoutePlan) {
    let catch_all = &plan.catch_all;
    match &catch_all.guard {
        Guard::BasicAuth { .. } => {
            out.push_str("\n        location / {\n");
            out.push_str("            auth_basic \"supafast\";\n");
            let _ = writeln!(out, "            auth_basic_user_file {HTPASSWD_PATH};");
        }
        Guard::ForwardAuth {
            daemon,
            identity_headers,
        } => {
            let _ = writeln!(out, "\n        location = {AUTHZ_LOCATION} {{");
            out.push_str("            internal;\n");
            let _ = writeln!(
                out,
                "            proxy_pass http://{}{AUTH_REQUEST_PATH};",
                upstream_name(daemon)
            );
            out.push_str("            proxy_pass_request_body off;\n");
            out.push_str("            proxy_set_header Content-Length \"\";\n");
            out.push_str(
                "            proxy_set_header X-Original-Method $request_method;\n",
            );
            out.push_str(
                "            proxy_set_header X-Original-URL $scheme://$http_host$request_uri;\n",
            );
            out.push_str(
                "            proxy_set_header X-Forwarded-For $remote_addr;\n",
            );
            out.push_str("        }\n");

            out.push_str("\n        location / {\n");
            let _ = writeln!(out, "            auth_request {AUTHZ_LOCATION};");
            for header in identity_headers.iter() {
                let var = header_var(header);
                let _ = writeln!(
                    out,
                    "            auth_request_set $authelia_{var} $upstream_http_{var};"
                );
                let _ = writeln!(
                    out,
                    "            proxy_set_header {header} $authelia_{var};"
                );
            }
            out.push_str(
                "            auth_request_set $redirection_url $upstream_http_location;\n",
            );
            out.push_str("            error_page 401 =302 $redirection_url;\n");
        }
    }
    let _ = writeln!(
        out,
        "            proxy_pass http://{};",
        upstream_name(&catch_all.upstream)
    );
    proxy_headers(out, "            ");
    out.push_str("        }\n");
}

fn header_var(header: &str) -> String {
    header.to_ascii_lowercase().replace('-', "_")
}

fn render_portal(out: &mut String, plan: &RoutePlan, portal: &PortalSite) {
    open_server(out, plan, &portal.host);
    out.push_str("\n        location / {\n");
    let _ = writeln!(
        out,
        "            proxy_pass http://{};",
        upstream_name(&portal.upstream)
    );
    proxy_headers(out, "            ");
    out.push_str("        }\n");
    out.push_str("    }\n");
}
