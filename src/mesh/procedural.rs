//! Basic procedural mesh generation routines.
use crate::error::MeshGenerationError;
use crate::mesh::Mesh;
use crate::Real;
use nalgebra::{convert, Point1, Point2, Point3, U1, U2, U3};

fn fraction<T: Real>(i: usize, n: usize) -> T {
    convert(i as f64 / n as f64)
}

/// Uniform mesh of the unit interval `[0, 1]` with `n` cells.
pub fn create_unit_interval_mesh<T: Real>(n: usize) -> eyre::Result<Mesh<T, U1>> {
    if n == 0 {
        return Err(MeshGenerationError::ZeroSubdivisions.into());
    }
    let vertices = (0..=n).map(|i| Point1::new(fraction(i, n))).collect();
    let cells = (0..n).map(|i| [i, i + 1]).collect();
    Ok(Mesh::try_from_vertices_and_cells(vertices, cells)?)
}

/// Uniform triangle mesh of the unit square with `nx * ny` squares, each split into two
/// triangles along the diagonal from its lower left to its upper right corner.
pub fn create_unit_square_mesh<T: Real>(nx: usize, ny: usize) -> eyre::Result<Mesh<T, U2>> {
    if nx == 0 || ny == 0 {
        return Err(MeshGenerationError::ZeroSubdivisions.into());
    }

    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1));
    for iy in 0..=ny {
        for ix in 0..=nx {
            vertices.push(Point2::new(fraction(ix, nx), fraction(iy, ny)));
        }
    }

    let mut cells = Vec::with_capacity(2 * nx * ny);
    for iy in 0..ny {
        for ix in 0..nx {
            let v0 = iy * (nx + 1) + ix;
            let v1 = v0 + 1;
            let v2 = v0 + (nx + 1);
            let v3 = v1 + (nx + 1);
            cells.push([v0, v1, v3]);
            cells.push([v0, v2, v3]);
        }
    }

    Ok(Mesh::try_from_vertices_and_cells(vertices, cells)?)
}

/// Uniform tetrahedral mesh of the unit cube. See [`create_box_mesh`].
pub fn create_unit_cube_mesh<T: Real>(nx: usize, ny: usize, nz: usize) -> eyre::Result<Mesh<T, U3>> {
    create_box_mesh(&Point3::origin(), &Point3::new(T::one(), T::one(), T::one()), nx, ny, nz)
}

/// Uniform tetrahedral mesh of the axis-aligned box with corners `p0` and `p1`.
///
/// The box is divided into `nx * ny * nz` cubes, and every cube is split into six tetrahedra
/// sharing the diagonal between the cube's first and last vertex. Vertex `(ix, iy, iz)` of the
/// grid has index `iz * (nx + 1) * (ny + 1) + iy * (nx + 1) + ix`.
pub fn create_box_mesh<T: Real>(
    p0: &Point3<T>,
    p1: &Point3<T>,
    nx: usize,
    ny: usize,
    nz: usize,
) -> eyre::Result<Mesh<T, U3>> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(MeshGenerationError::ZeroSubdivisions.into());
    }
    if (0..3).any(|i| p1[i] <= p0[i]) {
        return Err(MeshGenerationError::DegenerateBox.into());
    }

    let extents = p1 - p0;
    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for iz in 0..=nz {
        for iy in 0..=ny {
            for ix in 0..=nx {
                let x = p0.x + extents.x * fraction(ix, nx);
                let y = p0.y + extents.y * fraction(iy, ny);
                let z = p0.z + extents.z * fraction(iz, nz);
                vertices.push(Point3::new(x, y, z));
            }
        }
    }

    let layer = (nx + 1) * (ny + 1);
    let mut cells = Vec::with_capacity(6 * nx * ny * nz);
    for iz in 0..nz {
        for iy in 0..ny {
            for ix in 0..nx {
                let v0 = iz * layer + iy * (nx + 1) + ix;
                let v1 = v0 + 1;
                let v2 = v0 + (nx + 1);
                let v3 = v1 + (nx + 1);
                let v4 = v0 + layer;
                let v5 = v1 + layer;
                let v6 = v2 + layer;
                let v7 = v3 + layer;

                cells.push([v0, v1, v3, v7]);
                cells.push([v0, v1, v7, v5]);
                cells.push([v0, v5, v7, v4]);
                cells.push([v0, v3, v2, v7]);
                cells.push([v0, v6, v4, v7]);
                cells.push([v0, v2, v6, v7]);
            }
        }
    }

    Ok(Mesh::try_from_vertices_and_cells(vertices, cells)?)
}
