//! TileMux CLI - Command-line interface
//!
//! Exercises the library against an in-process worker backend: `decode`
//! round-trips a tile through a local worker pool, `pick` runs a pick query
//! over a small synthetic scene. Useful for smoke-testing and as a usage
//! example of both subsystems.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use glam::DVec3;
use serde_json::json;
use tracing::info;

use tilemux::geo::{TileKey, TileKeyError};
use tilemux::geometry::{OrientedBox, Ray};
use tilemux::pick::{
    GeometryKind, IntersectParams, MapTile, ObjectData, PickCamera, PickHandler, PickableObject,
    RawIntersection, TileIndex,
};
use tilemux::worker::{
    LocalWorkerLauncher, ServiceRequest, WorkerScript, WorkerSetError, WorkerSetOptions,
    WorkerSetRegistry,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid tile address: {0}")]
    TileAddress(String),
    #[error(transparent)]
    TileKey(#[from] TileKeyError),
    #[error(transparent)]
    Worker(#[from] WorkerSetError),
}

#[derive(Parser)]
#[command(name = "tilemux", about = "Tile dispatch and picking demo", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a tile through a local worker pool
    Decode {
        /// Tile address as level/row/col
        #[arg(long, default_value = "14/6294/8583")]
        tile: String,
        /// Number of workers in the pool
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },
    /// Run a pick query over a synthetic scene
    Pick {
        /// Screen x in CSS pixels (viewport is 800x600)
        #[arg(long, default_value_t = 400.0)]
        x: f64,
        /// Screen y in CSS pixels
        #[arg(long, default_value_t = 300.0)]
        y: f64,
        /// Maximum number of results, 0 for unlimited
        #[arg(long, default_value_t = 0)]
        max_results: usize,
    },
}

fn parse_tile(s: &str) -> Result<TileKey, CliError> {
    let parts: Vec<&str> = s.split('/').collect();
    let [level, row, col] = parts.as_slice() else {
        return Err(CliError::TileAddress(s.to_owned()));
    };
    let level = level
        .parse()
        .map_err(|_| CliError::TileAddress(s.to_owned()))?;
    let row = row
        .parse()
        .map_err(|_| CliError::TileAddress(s.to_owned()))?;
    let col = col
        .parse()
        .map_err(|_| CliError::TileAddress(s.to_owned()))?;
    Ok(TileKey::new(level, row, col)?)
}

async fn run_decode(tile: &str, workers: usize) -> Result<(), CliError> {
    let key = parse_tile(tile)?;

    // In-process worker that "decodes" by describing its input.
    let launcher = LocalWorkerLauncher::new(Arc::new(
        |_service: &str, request: &ServiceRequest| match request {
            ServiceRequest::DecodeTileRequest {
                tile_key,
                data,
                projection,
            } => Ok(json!({
                "tileKey": tile_key,
                "byteLength": data.len(),
                "projection": projection,
                "geometries": [],
            })),
            _ => Err(json!({"message": "unsupported request"})),
        },
    ));

    let registry = WorkerSetRegistry::new(WorkerScript::new("local-decoder"), Arc::new(launcher));
    let decoder = registry.get_tile_decoder(
        "vector-decoder",
        WorkerSetOptions {
            worker_count: Some(workers),
            ..Default::default()
        },
    );
    decoder.connect().await?;
    info!(service = decoder.service_id(), workers, "decoder connected");

    let decoded = decoder
        .decode_tile(key, vec![0u8; 128], "mercator", None)
        .await?;
    println!("decoded {key}: {}", decoded.payload);

    decoder.dispose().await;
    registry.destroy();
    Ok(())
}

// =============================================================================
// Synthetic pick scene
// =============================================================================

struct DemoCamera;

impl PickCamera for DemoCamera {
    fn viewport(&self) -> (f64, f64) {
        (800.0, 600.0)
    }

    // Orthographic top-down view: screen maps to world [-400,400]x[-300,300].
    fn ray_from_ndc(&self, ndc_x: f64, ndc_y: f64) -> Ray {
        Ray::new(
            DVec3::new(ndc_x * 400.0, ndc_y * 300.0, 1000.0),
            DVec3::new(0.0, 0.0, -1.0),
        )
    }
}

struct Box3D {
    data: ObjectData,
    bounds: OrientedBox,
}

impl Box3D {
    fn new(center: DVec3, extents: DVec3, render_order: f64) -> Arc<Self> {
        Arc::new(Self {
            data: ObjectData {
                geometry_kind: Some(GeometryKind::ExtrudedPolygon),
                render_order: Some(render_order),
                features: None,
            },
            bounds: OrientedBox::axis_aligned(center, extents),
        })
    }
}

impl PickableObject for Box3D {
    fn data(&self) -> &ObjectData {
        &self.data
    }

    fn raycast(&self, ray: &Ray, out: &mut Vec<RawIntersection>) {
        if let Some(distance) = self.bounds.intersects_ray(ray) {
            out.push(RawIntersection {
                distance,
                point: ray.point_at(distance),
                element_index: None,
            });
        }
    }
}

struct DemoTiles {
    tiles: Vec<Arc<MapTile>>,
}

impl TileIndex for DemoTiles {
    fn visible_tiles(&self) -> Vec<Arc<MapTile>> {
        self.tiles.clone()
    }

    fn tile_by_code(&self, morton_code: u64) -> Option<Arc<MapTile>> {
        self.tiles
            .iter()
            .find(|t| t.key.morton_code() == morton_code)
            .cloned()
    }
}

fn demo_scene() -> Result<Arc<DemoTiles>, CliError> {
    let mut tiles = Vec::new();
    for (i, (center_x, height)) in [(-100.0, 40.0), (0.0, 80.0), (100.0, 20.0)]
        .into_iter()
        .enumerate()
    {
        let key = TileKey::new(5, 10, 12 + i as u32)?;
        let building = Box3D::new(
            DVec3::new(center_x, 0.0, height / 2.0),
            DVec3::new(30.0, 30.0, height / 2.0),
            i as f64,
        );
        tiles.push(Arc::new(MapTile {
            key,
            data_source: "buildings".to_owned(),
            data_source_order: 0,
            bounding_box: OrientedBox::axis_aligned(
                DVec3::new(center_x, 0.0, height / 2.0),
                DVec3::new(50.0, 50.0, height / 2.0),
            ),
            world_offset_x: 0.0,
            objects: vec![building],
            dependencies: Vec::new(),
        }));
    }
    Ok(Arc::new(DemoTiles { tiles }))
}

fn run_pick(x: f64, y: f64, max_results: usize) -> Result<(), CliError> {
    let handler = PickHandler::new(Arc::new(DemoCamera), demo_scene()?);
    let results = handler.intersect_map_objects(
        x,
        y,
        &IntersectParams {
            max_result_count: max_results,
        },
    );

    if results.is_empty() {
        println!("no hit at ({x}, {y})");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        let tile = result
            .tile_key
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{i}: {:?} tile={tile} distance={:.2} point=({:.1}, {:.1}, {:.1})",
            result.object_type, result.distance, result.point.x, result.point.y, result.point.z,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Decode { tile, workers } => run_decode(&tile, workers).await,
        Command::Pick { x, y, max_results } => run_pick(x, y, max_results),
    }
}
