//! Binarization applied to page images before OCR.
//!
//! Grayscale uses BT.601 luma weights; the threshold is an adaptive Gaussian
//! one: a pixel is white when it is brighter than its Gaussian-weighted
//! neighbourhood mean minus a small constant.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;

pub const BLOCK_SIZE: usize = 11;
pub const THRESHOLD_C: i32 = 2;
pub const MAX_VALUE: u8 = 255;

/// Grayscale followed by adaptive thresholding with the fixed OCR parameters.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    adaptive_gaussian_threshold(&grayscale(image), BLOCK_SIZE, THRESHOLD_C)
}

pub fn grayscale(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// `block_size` must be odd.
pub fn adaptive_gaussian_threshold(gray: &GrayImage, block_size: usize, c: i32) -> GrayImage {
    let mean = neighbourhood_mean(gray, &gaussian_kernel(block_size));
    let mut out = GrayImage::new(gray.width(), gray.height());

    for ((dst, &src), m) in out.iter_mut().zip(gray.as_raw()).zip(mean.as_raw()) {
        let threshold = m.round() as i32 - c;
        *dst = if i32::from(src) > threshold { MAX_VALUE } else { 0 };
    }
    out
}

fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

// Blurred in f32 so the mean is rounded once, at comparison time.
fn neighbourhood_mean(gray: &GrayImage, kernel: &[f32]) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let wide = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([f32::from(gray.get_pixel(x, y).0[0])])
    });
    separable_filter_equal(&wide, kernel)
}
