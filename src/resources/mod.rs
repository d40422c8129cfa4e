//! Loading part meshes and persisted fragments from external files.
//!
//! Files are looked up under `./assets/` on native targets and under
//! `<origin>/assets/` when running in the browser.
//!
//! glTF scenes are read into [`SourceMesh`]es: every triangle primitive of
//! every node in the default scene becomes one part, with the node hierarchy's
//! transforms baked into its vertices.

use anyhow::anyhow;
use cgmath::{InnerSpace, Matrix4, Point3, SquareMatrix, Transform, Vector3};
use gltf::{buffer::Source, material::AlphaMode, mesh::Mode};

use crate::{
    data_structures::{
        fragment::Fragment,
        geometry::{SourceMaterial, SourceMesh},
        instance::normal_matrix,
    },
    schema::{self, FragmentsGroup, StreamedGeometries},
};

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    let window = web_sys::window().ok_or_else(|| anyhow!("No browser window available"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow!("Could not read the page origin"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin))?;
    Ok(base.join(file_name)?)
}

pub async fn load_binary(file_name: &str) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        let url = format_url(file_name)?;
        reqwest::get(url).await?.bytes().await?.to_vec()
    };
    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        let path = std::path::Path::new("./").join("assets").join(file_name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow!("Could not read {}: {}", path.display(), e))?
    };

    Ok(data)
}

fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

/// Read every part of a self-contained glTF (GLB or embedded buffers).
pub fn source_meshes_from_gltf(bytes: &[u8]) -> anyhow::Result<Vec<SourceMesh>> {
    let gltf = gltf::Gltf::from_slice(bytes)?;
    let buffers = gltf::import_buffers(&gltf.document, None, gltf.blob.clone())?
        .into_iter()
        .map(|data| data.0)
        .collect::<Vec<_>>();
    Ok(collect_scene(&gltf, &buffers))
}

/// Read the parts of `file_name`, fetching external buffers next to it.
pub async fn load_source_meshes(file_name: &str) -> anyhow::Result<Vec<SourceMesh>> {
    let bytes = load_binary(file_name).await?;
    let gltf = gltf::Gltf::from_slice(&bytes)?;
    let external = gltf
        .buffers()
        .any(|buffer| matches!(buffer.source(), Source::Uri(uri) if !is_data_uri(uri)));
    if !external {
        return source_meshes_from_gltf(&bytes);
    }

    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            Source::Bin => {
                let blob = gltf
                    .blob
                    .clone()
                    .ok_or_else(|| anyhow!("{} references a binary chunk it does not have", file_name))?;
                buffers.push(blob);
            }
            Source::Uri(uri) if is_data_uri(uri) => {
                return Err(anyhow!(
                    "{} mixes embedded and external buffers, which is not supported",
                    file_name
                ));
            }
            Source::Uri(uri) => buffers.push(load_binary(uri).await?),
        }
    }
    Ok(collect_scene(&gltf, &buffers))
}

fn collect_scene(gltf: &gltf::Gltf, buffers: &[Vec<u8>]) -> Vec<SourceMesh> {
    let mut meshes = Vec::new();
    let Some(scene) = gltf.default_scene().or_else(|| gltf.scenes().next()) else {
        log::warn!("glTF file has no scene, nothing to load.");
        return meshes;
    };
    for node in scene.nodes() {
        collect_node(&node, Matrix4::identity(), buffers, &mut meshes);
    }
    meshes
}

fn collect_node(node: &gltf::Node, parent: Matrix4<f32>, buffers: &[Vec<u8>], meshes: &mut Vec<SourceMesh>) {
    let transform = parent * Matrix4::from(node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        let mesh_name = mesh.name().or(node.name()).unwrap_or("mesh");
        for primitive in mesh.primitives() {
            let name = format!("{}#{}", mesh_name, primitive.index());
            if primitive.mode() != Mode::Triangles {
                log::warn!(
                    "Primitive {} uses {:?} instead of a triangle list and is skipped.",
                    name,
                    primitive.mode()
                );
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let Some(positions) = reader.read_positions() else {
                log::warn!("Primitive {} has no positions and is skipped.", name);
                continue;
            };
            let positions: Vec<[f32; 3]> = positions
                .map(|p| -> [f32; 3] { transform.transform_point(Point3::from(p)).into() })
                .collect();
            let normal_transform = normal_matrix(&transform);
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|normals| {
                    normals
                        .map(|n| -> [f32; 3] {
                            let n = normal_transform * Vector3::from(n);
                            if n.magnitude2() > 0.0 { n.normalize().into() } else { n.into() }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            // Non-indexed primitives draw their vertices in order
            let indices = reader
                .read_indices()
                .map(|indices| indices.into_u32().collect::<Vec<u32>>())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            let material = primitive.material();
            let pbr = material.pbr_metallic_roughness();
            let source_material = SourceMaterial {
                name: material.name().unwrap_or("default").to_string(),
                base_color: pbr.base_color_factor(),
                transparent: material.alpha_mode() == AlphaMode::Blend,
            };

            meshes.push(
                SourceMesh::new(&name, positions, indices)
                    .with_normals(normals)
                    .with_material(source_material),
            );
        }
    }
    for child in node.children() {
        collect_node(&child, transform, buffers, meshes);
    }
}

/// Load a glTF file as one fragment with room for `capacity` instances.
pub async fn load_fragment(file_name: &str, capacity: usize) -> anyhow::Result<Fragment> {
    let meshes = load_source_meshes(file_name).await?;
    let parts = meshes.len();
    let fragment = Fragment::new(file_name, meshes, capacity)?;
    log::info!("Loaded fragment '{}' with {} parts", file_name, parts);
    Ok(fragment)
}

/// Load several glTF files concurrently, one fragment each.
pub async fn load_fragments(file_names: &[&str], capacity: usize) -> anyhow::Result<Vec<Fragment>> {
    futures::future::join_all(file_names.iter().map(|file| load_fragment(file, capacity)))
        .await
        .into_iter()
        .collect()
}

pub async fn load_group(file_name: &str) -> anyhow::Result<FragmentsGroup> {
    let bytes = load_binary(file_name).await?;
    let group = FragmentsGroup::decode(&bytes)?;
    log::info!("Loaded group '{}' with {} fragments", file_name, group.items.len());
    Ok(group)
}

pub async fn load_streamed_geometries(file_name: &str) -> anyhow::Result<StreamedGeometries> {
    let bytes = load_binary(file_name).await?;
    Ok(schema::decode(&bytes)?)
}
