#![allow(dead_code)]

use codice_cam::core::{homography_from_4pt, square_corners, GrayImage};
use codice_cam::detect::{cells_for_id, CELL_PX, DATA_GRID, DESKEW_SIZE};
use nalgebra::Point2;

/// White frame with one upright marker per `(id, center)`.
pub fn table_frame(width: usize, height: usize, markers: &[(u32, (f32, f32))]) -> GrayImage {
    let mut frame = GrayImage::filled(width, height, 255);
    for &(id, (cx, cy)) in markers {
        paint_marker(&mut frame, cells_for_id(id), cx, cy, 100.0);
    }
    frame
}

fn marker_luma(cells: u16, u: f32, v: f32) -> u8 {
    let c = (u / CELL_PX as f32).floor() as usize;
    let r = (v / CELL_PX as f32).floor() as usize;
    if r == 0 || c == 0 || r > DATA_GRID || c > DATA_GRID {
        return 0;
    }
    if (cells >> ((r - 1) * DATA_GRID + (c - 1))) & 1 == 1 {
        255
    } else {
        0
    }
}

fn paint_marker(frame: &mut GrayImage, cells: u16, cx: f32, cy: f32, side: f32) {
    let h = side / 2.0;
    let corners = [(-h, -h), (h, -h), (h, h), (-h, h)].map(|(x, y)| Point2::new(cx + x, cy + y));
    let raster = DESKEW_SIZE as f32;
    let inv = homography_from_4pt(&square_corners(raster), &corners)
        .and_then(|h| h.inverse())
        .expect("marker homography");
    for y in 0..frame.height {
        for x in 0..frame.width {
            let p = inv.apply(Point2::new(x as f32 + 0.5, y as f32 + 0.5));
            if p.x >= 0.0 && p.y >= 0.0 && p.x < raster && p.y < raster {
                frame.set(x, y, marker_luma(cells, p.x, p.y));
            }
        }
    }
}

/// Same pixels as an `image` crate buffer, for writing test files.
pub fn to_image(frame: &GrayImage) -> image::GrayImage {
    image::GrayImage::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())
        .expect("buffer size")
}
