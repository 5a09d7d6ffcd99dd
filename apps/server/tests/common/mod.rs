// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use meshquote_server::services::queue::{self, QueueConfig, TaskQueue};
use meshquote_server::services::LocalModelStorage;
use tempfile::TempDir;

/// A queue backed by a fresh SQLite file with an approved-model directory
pub struct Fixture {
    pub dir: TempDir,
    pub queue: TaskQueue,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(QueueConfig::default()).await
    }

    pub async fn with_config(config: QueueConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("approved")).unwrap();

        let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
        let pool = queue::connect(&url, 8).await.unwrap();
        let storage = LocalModelStorage::new(Vec::<PathBuf>::new(), dir.path().join("approved"));
        let queue = TaskQueue::new(pool, Arc::new(storage), config);
        queue.ensure_schema().await.unwrap();

        Self { dir, queue }
    }

    pub fn approved(&self) -> PathBuf {
        self.dir.path().join("approved")
    }

    /// Write a unit cube as `approved/<id>.stl`
    pub fn add_cube(&self, id: &str) -> PathBuf {
        let path = self.approved().join(format!("{id}.stl"));
        write_cube_stl(&path);
        path
    }
}

const CUBE_VERTICES: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [10.0, 0.0, 0.0],
    [10.0, 10.0, 0.0],
    [0.0, 10.0, 0.0],
    [0.0, 0.0, 10.0],
    [10.0, 0.0, 10.0],
    [10.0, 10.0, 10.0],
    [0.0, 10.0, 10.0],
];

const CUBE_FACES: [[usize; 3]; 12] = [
    [0, 2, 1],
    [0, 3, 2],
    [4, 5, 6],
    [4, 6, 7],
    [0, 1, 5],
    [0, 5, 4],
    [2, 3, 7],
    [2, 7, 6],
    [1, 2, 6],
    [1, 6, 5],
    [0, 4, 7],
    [0, 7, 3],
];

fn stl_bytes(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
    let mut out = vec![0u8; 80];
    out.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
    for tri in triangles {
        out.extend_from_slice(&[0u8; 12]);
        for v in tri {
            for c in v {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&[0u8; 2]);
    }
    out
}

pub fn write_cube_stl(path: &Path) {
    let tris: Vec<[[f32; 3]; 3]> = CUBE_FACES
        .iter()
        .map(|f| [CUBE_VERTICES[f[0]], CUBE_VERTICES[f[1]], CUBE_VERTICES[f[2]]])
        .collect();
    std::fs::write(path, stl_bytes(&tris)).unwrap();
}

/// The same sloped triangle `count` times
pub fn write_dense_stl(path: &Path, count: usize) {
    let tri = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 10.0]];
    std::fs::write(path, stl_bytes(&vec![tri; count])).unwrap();
}
