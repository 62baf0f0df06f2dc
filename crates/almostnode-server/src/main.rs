//! `almostnode-dev`: a small standalone CLI that seeds an
//! [`InMemoryVfs`] from a real host directory and drives one
//! [`DevServer::handle_request`] call against it, printing the
//! resulting status, headers, and body.
//!
//! This is the library-consumer role spec's out-of-scope §1 assigns to
//! a Service Worker bridge in the browser; outside a browser tab there
//! is no such bridge, so this binary plays host instead, the way the
//! teacher's own `napi` crate is the non-browser host that wires
//! `next-core`/`next-api` together for a CLI/editor integration.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use almostnode_core::config::NextDevServerOptions;
use almostnode_server::{DevRequest, DevServer};
use almostnode_vfs::InMemoryVfs;

/// Serve one request out of a Next.js-shaped project directory.
#[derive(Parser, Debug)]
#[command(name = "almostnode-dev", version, about)]
struct Cli {
    /// Host directory containing pages/, app/, public/, node_modules/, etc.
    #[arg(long, default_value = ".")]
    project: String,

    /// HTTP method of the request to serve.
    #[arg(long, default_value = "GET")]
    method: String,

    /// Request path, e.g. `/` or `/api/hello?n=1`.
    #[arg(long, default_value = "/")]
    path: String,

    /// Force the App Router (`true`) or Pages Router (`false`); default
    /// auto-detects via `app/page.{ext}` existence (spec §6.4).
    #[arg(long)]
    prefer_app_router: Option<bool>,

    /// Dev server virtual port (spec's `/__virtual__/<port>` prefix).
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let vfs = Arc::new(InMemoryVfs::new());
    seed_from_host_dir(&vfs, Path::new(&cli.project), "")?;

    let options = NextDevServerOptions {
        port: cli.port,
        prefer_app_router: cli.prefer_app_router,
        ..Default::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let server = DevServer::new(vfs, options);
        let request = DevRequest {
            method: cli.method,
            path: cli.path,
            ..Default::default()
        };
        let response = server.handle_request(&request).await;
        server.stop();

        println!("{} {}", response.status_code, response.status_message);
        for (name, value) in &response.headers {
            println!("{name}: {value}");
        }
        println!();
        println!("{}", String::from_utf8_lossy(&response.body));
    });

    Ok(())
}

/// Recursively copies a real host directory into `vfs`, mapping
/// `<project>/<rel>` to the absolute VFS path `/<rel>` (spec §6.1: "the
/// VFS itself" is an external collaborator; this is the glue a
/// non-browser host needs to stand one up from a real checkout).
fn seed_from_host_dir(vfs: &InMemoryVfs, host_dir: &Path, vfs_dir: &str) -> anyhow::Result<()> {
    vfs.seed_dir(if vfs_dir.is_empty() { "/" } else { vfs_dir });
    for entry in std::fs::read_dir(host_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let vfs_path = format!("{}/{name}", vfs_dir.trim_end_matches('/'));
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            seed_from_host_dir(vfs, &entry.path(), &vfs_path)?;
        } else if file_type.is_file() {
            let bytes = std::fs::read(entry.path())?;
            vfs.seed_file(&vfs_path, bytes);
        }
    }
    Ok(())
}
