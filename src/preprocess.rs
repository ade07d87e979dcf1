use clap::ValueEnum;
use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView4};

use crate::error::DecodeError;

/// How an image is brought to the model's input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResizeMethod {
    /// Scale to cover the target, then center crop.
    #[default]
    Crop,
    /// Stretch to the target, ignoring aspect ratio.
    Squish,
    /// Scale to fit inside the target and pad with the mean color.
    Pad,
}

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub height: usize,
    pub width: usize,
    pub resize: ResizeMethod,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            height: 224,
            width: 224,
            resize: ResizeMethod::Crop,
        }
    }
}

/// RGB pixels normalized into a `(1, 3, height, width)` tensor.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    data: Array4<f32>,
}

impl NormalizedImage {
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn height(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[3]
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }
}

#[derive(Debug, Clone)]
pub struct Processor {
    pub config: PreprocessConfig,
}

impl Processor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Decode uploaded bytes, force RGB, resize and normalize.
    pub fn decode(&self, bytes: &[u8]) -> Result<NormalizedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let resized = self.resize(rgb)?;
        self.normalize(&resized)
    }

    fn resize(&self, rgb: RgbImage) -> Result<RgbImage, DecodeError> {
        let (width, height) = (self.config.width as u32, self.config.height as u32);
        if rgb.dimensions() == (width, height) {
            return Ok(rgb);
        }
        let src = DynamicImage::ImageRgb8(rgb);
        match self.config.resize {
            ResizeMethod::Squish => resize_exact(&src, width, height, None),
            ResizeMethod::Crop => resize_exact(&src, width, height, Some((0.5, 0.5))),
            ResizeMethod::Pad => self.letterbox(&src),
        }
    }

    fn letterbox(&self, src: &DynamicImage) -> Result<RgbImage, DecodeError> {
        let (width, height) = (self.config.width as u32, self.config.height as u32);
        let (orig_width, orig_height) = (src.width(), src.height());
        let scale = (width as f32 / orig_width as f32).min(height as f32 / orig_height as f32);
        let new_width = ((orig_width as f32 * scale) as u32).clamp(1, width);
        let new_height = ((orig_height as f32 * scale) as u32).clamp(1, height);
        let resized = resize_exact(src, new_width, new_height, None)?;

        let fill = self.config.mean.map(|m| (m * 255.0).round() as u8);
        let mut padded = RgbImage::from_pixel(width, height, image::Rgb(fill));
        let x_offset = (width - new_width) / 2;
        let y_offset = (height - new_height) / 2;
        image::imageops::overlay(&mut padded, &resized, x_offset as i64, y_offset as i64);
        Ok(padded)
    }

    fn normalize(&self, img: &RgbImage) -> Result<NormalizedImage, DecodeError> {
        let (width, height) = (img.width() as usize, img.height() as usize);
        if (width, height) != (self.config.width, self.config.height) {
            return Err(DecodeError::Buffer);
        }
        let PreprocessConfig { mean, std, .. } = &self.config;

        let mut data = Array4::<f32>::zeros((1, 3, height, width));
        for (x, y, rgb) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                data[[0, c, y, x]] = (rgb[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }
        Ok(NormalizedImage { data })
    }
}

/// Bilinear resize into a `width` x `height` RGB buffer. With `centering`, the
/// source is cropped to the destination aspect ratio around that point first.
fn resize_exact(
    src: &DynamicImage,
    width: u32,
    height: u32,
    centering: Option<(f64, f64)>,
) -> Result<RgbImage, DecodeError> {
    let mut dst_image = Image::new(width, height, PixelType::U8x3);
    let mut options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));
    if centering.is_some() {
        options = options.fit_into_destination(centering);
    }
    Resizer::new().resize(src, &mut dst_image, &options)?;
    RgbImage::from_raw(width, height, dst_image.buffer().to_vec()).ok_or(DecodeError::Buffer)
}
