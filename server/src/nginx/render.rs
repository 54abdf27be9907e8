//! Rendering and structural validation of the dual-upstream config.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use vane_common::{Pool, WeightAllocation};

/// Backend rendered into a pool with no active servers, so the proxy
/// still parses the upstream block.
pub const PLACEHOLDER_BACKEND: &str = "127.0.0.1:65535";

/// Materialization failures. A failed render or validation aborts the
/// cycle's write and reload; the prior artifact stays in effect.
#[derive(Debug, thiserror::Error)]
pub enum NginxError {
    #[error("rendered config is empty")]
    Empty,
    #[error("unbalanced braces in rendered config ({open} open, {close} close)")]
    UnbalancedBraces { open: usize, close: usize },
    #[error("rendered config is missing the upstream directives")]
    MissingUpstreams,
    #[error("failed to write config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Render the full proxy config for both pools.
///
/// Deterministic: identical allocations and timestamp produce identical
/// bytes. Active allocations get a loopback port allocated sequentially
/// from the pool's base port; each port is served by a local server block
/// that forwards to the backend over TLS.
#[must_use]
pub fn render_config(
    incoming: &[WeightAllocation],
    outgoing: &[WeightAllocation],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Managed by vane-server - do not edit by hand.");
    let _ = writeln!(out, "# Generated: {}", generated_at.to_rfc3339());
    let _ = writeln!(
        out,
        "# Pool incoming: {} active / {} total; pool outgoing: {} active / {} total",
        active(incoming).count(),
        incoming.len(),
        active(outgoing).count(),
        outgoing.len(),
    );
    out.push('\n');

    for (pool, allocations) in [(Pool::Incoming, incoming), (Pool::Outgoing, outgoing)] {
        render_upstream(&mut out, pool, allocations);
    }
    for (pool, allocations) in [(Pool::Incoming, incoming), (Pool::Outgoing, outgoing)] {
        render_local_servers(&mut out, pool, allocations);
    }
    out
}

fn active(allocations: &[WeightAllocation]) -> impl Iterator<Item = &WeightAllocation> {
    allocations.iter().filter(|a| a.is_active())
}

fn render_upstream(out: &mut String, pool: Pool, allocations: &[WeightAllocation]) {
    let _ = writeln!(out, "upstream {} {{", pool.upstream_name());
    let mut rendered_any = false;
    for (i, allocation) in active(allocations).enumerate() {
        let port = pool.internal_base_port() + i as u16;
        let _ = writeln!(
            out,
            "    server 127.0.0.1:{port} weight={}; # {}",
            allocation.weight, allocation.server_id
        );
        rendered_any = true;
    }
    if !rendered_any {
        let _ = writeln!(
            out,
            "    server {PLACEHOLDER_BACKEND}; # placeholder - no active servers"
        );
    }
    let _ = writeln!(out, "}}");
    out.push('\n');
}

fn render_local_servers(out: &mut String, pool: Pool, allocations: &[WeightAllocation]) {
    for (i, allocation) in active(allocations).enumerate() {
        let port = pool.internal_base_port() + i as u16;
        let (hostname, path) = split_address(&allocation.address);

        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen 127.0.0.1:{port};");
        out.push('\n');
        let _ = writeln!(out, "    location / {{");
        let _ = writeln!(out, "        proxy_pass https://{hostname}{path};");
        let _ = writeln!(out, "        proxy_ssl_server_name on;");
        let _ = writeln!(out, "        proxy_set_header Host {};", host_only(hostname));
        let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(
            out,
            "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
        );
        let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
        let _ = writeln!(out, "        proxy_connect_timeout 30s;");
        let _ = writeln!(out, "        proxy_send_timeout 30s;");
        let _ = writeln!(out, "        proxy_read_timeout 30s;");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
        out.push('\n');
    }
}

/// Split `host[:port][/path]` into the authority part and the path suffix.
fn split_address(address: &str) -> (&str, &str) {
    match address.find('/') {
        Some(idx) => address.split_at(idx),
        None => (address, ""),
    }
}

/// Strip any port from an authority for the Host header.
fn host_only(authority: &str) -> &str {
    authority.split(':').next().unwrap_or(authority)
}

/// Structural sanity checks before anything touches the filesystem.
pub fn validate_config(text: &str) -> Result<(), NginxError> {
    if text.trim().is_empty() {
        return Err(NginxError::Empty);
    }
    let open = text.matches('{').count();
    let close = text.matches('}').count();
    if open != close {
        return Err(NginxError::UnbalancedBraces { open, close });
    }
    if !text.contains("upstream upstream_incoming")
        && !text.contains("upstream upstream_outgoing")
    {
        return Err(NginxError::MissingUpstreams);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(id: &str, address: &str, weight: u32) -> WeightAllocation {
        WeightAllocation {
            server_id: id.into(),
            address: address.into(),
            weight,
            health_score: 0.9,
            reason: "Dynamic weight".into(),
            calculated_at: Utc::now(),
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn renders_both_upstreams_with_weights() {
        let incoming = vec![
            allocation("in-1", "a.example.com:8443", 60),
            allocation("in-2", "b.example.com", 40),
        ];
        let outgoing = vec![allocation("out-1", "c.example.com", 100)];
        let text = render_config(&incoming, &outgoing, ts());

        assert!(text.contains("upstream upstream_incoming {"));
        assert!(text.contains("upstream upstream_outgoing {"));
        assert!(text.contains("server 127.0.0.1:8081 weight=60; # in-1"));
        assert!(text.contains("server 127.0.0.1:8082 weight=40; # in-2"));
        assert!(text.contains("server 127.0.0.1:9081 weight=100; # out-1"));
        assert!(validate_config(&text).is_ok());
    }

    #[test]
    fn inactive_allocations_get_no_port_or_server_block() {
        let incoming = vec![
            allocation("in-1", "a.example.com", 0),
            allocation("in-2", "b.example.com", 100),
        ];
        let text = render_config(&incoming, &[], ts());

        // in-2 takes the first port; the zero-weight in-1 is absent.
        assert!(text.contains("server 127.0.0.1:8081 weight=100; # in-2"));
        assert!(!text.contains("# in-1"));
    }

    #[test]
    fn empty_pool_renders_placeholder() {
        let outgoing = vec![allocation("out-1", "c.example.com", 100)];
        let text = render_config(&[], &outgoing, ts());

        assert!(text.contains("upstream upstream_incoming {"));
        assert!(text.contains(PLACEHOLDER_BACKEND));
        assert!(validate_config(&text).is_ok());
    }

    #[test]
    fn local_server_forwards_over_tls_with_path() {
        let outgoing = vec![allocation("out-1", "api.example.com:9443/v2", 100)];
        let text = render_config(&[], &outgoing, ts());

        assert!(text.contains("listen 127.0.0.1:9081;"));
        assert!(text.contains("proxy_pass https://api.example.com:9443/v2;"));
        assert!(text.contains("proxy_set_header Host api.example.com;"));
        assert!(text.contains("proxy_read_timeout 30s;"));
    }

    #[test]
    fn render_is_deterministic() {
        let incoming = vec![allocation("in-1", "a.example.com", 70)];
        let outgoing = vec![allocation("out-1", "b.example.com", 100)];
        let first = render_config(&incoming, &outgoing, ts());
        let second = render_config(&incoming, &outgoing, ts());
        assert_eq!(first, second);
    }

    #[test]
    fn braces_always_balance() {
        let incoming = vec![
            allocation("in-1", "a.example.com", 50),
            allocation("in-2", "b.example.com/api", 50),
        ];
        let text = render_config(&incoming, &[], ts());
        assert_eq!(text.matches('{').count(), text.matches('}').count());
    }

    #[test]
    fn validation_rejects_broken_configs() {
        assert!(matches!(validate_config("  "), Err(NginxError::Empty)));
        assert!(matches!(
            validate_config("upstream upstream_incoming { server x; "),
            Err(NginxError::UnbalancedBraces { .. })
        ));
        assert!(matches!(
            validate_config("server { listen 80; }"),
            Err(NginxError::MissingUpstreams)
        ));
    }

    #[test]
    fn computed_pools_render_independently() {
        use std::collections::HashMap;
        use vane_common::{MetricSample, ServerDescriptor, WeightFactors};

        let server = |id: &str, pool: Pool| ServerDescriptor {
            id: id.into(),
            host: format!("{id}.backend.local"),
            port: None,
            name: String::new(),
            enabled: true,
            pool,
        };
        let sample = |id: &str, rt: f64| MetricSample {
            server_id: id.into(),
            avg_response_time_ms: rt,
            error_rate_pct: 0.5,
            success_rate_pct: 99.5,
            timeout_rate_pct: 0.1,
            uptime_pct: 99.9,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            requests_per_minute: None,
            window_timestamp: 0,
            created_at: Utc::now(),
            ewma_latency_ms: None,
            degradation_score: None,
        };

        let incoming_servers = vec![server("in-1", Pool::Incoming), server("in-2", Pool::Incoming)];
        let outgoing_servers = vec![
            server("out-1", Pool::Outgoing),
            server("out-2", Pool::Outgoing),
            server("out-3", Pool::Outgoing),
        ];
        let samples: HashMap<_, _> = [
            sample("in-1", 120.0),
            sample("in-2", 300.0),
            sample("out-1", 150.0),
            sample("out-2", 450.0),
            sample("out-3", 700.0),
        ]
        .into_iter()
        .map(|s| (s.server_id.clone(), s))
        .collect();

        let now = Utc::now();
        let incoming = crate::weights::compute_pool(
            &incoming_servers,
            &samples,
            &WeightFactors::BALANCED,
            &HashMap::new(),
            now,
        );
        let outgoing = crate::weights::compute_pool(
            &outgoing_servers,
            &samples,
            &WeightFactors::BALANCED,
            &HashMap::new(),
            now,
        );

        // Each pool normalizes to 100 on its own.
        assert_eq!(incoming.iter().map(|a| a.weight).sum::<u32>(), 100);
        assert_eq!(outgoing.iter().map(|a| a.weight).sum::<u32>(), 100);

        let text = render_config(&incoming, &outgoing, now);
        assert!(text.contains("upstream upstream_incoming"));
        assert!(text.contains("upstream upstream_outgoing"));
        assert!(validate_config(&text).is_ok());
    }

    #[test]
    fn address_splitting() {
        assert_eq!(split_address("host.example.com"), ("host.example.com", ""));
        assert_eq!(
            split_address("host.example.com:8443/v1/api"),
            ("host.example.com:8443", "/v1/api")
        );
        assert_eq!(host_only("host.example.com:8443"), "host.example.com");
        assert_eq!(host_only("host.example.com"), "host.example.com");
    }
}
