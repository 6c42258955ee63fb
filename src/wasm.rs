use js_sys::{Array, Float32Array, Function, JSON, Object, Reflect, Uint8Array, Uint32Array};
use wasm_bindgen::prelude::*;

use crate::options::GenerationOptions;
use crate::pipeline::{ExecutionMode, Pipeline, Progress};
use crate::pixels::PixelBuffer;
use crate::preview::preview_png;

// Browsers cannot spawn `std::thread`s, so wasm32 never tries.
#[cfg(target_arch = "wasm32")]
const MODE: ExecutionMode = ExecutionMode::Synchronous;
#[cfg(not(target_arch = "wasm32"))]
const MODE: ExecutionMode = ExecutionMode::Auto;

thread_local! {
    // One pipeline per JS realm so job ids and cancellation span calls.
    static PIPELINE: Pipeline = Pipeline::with_mode(MODE);
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(js_err)?;
    JSON::parse(&text)
}

/// Turn raw RGBA pixels (e.g. canvas `ImageData.data`) into a puzzle.
///
/// `options_json` is a partial `GenerationOptions` object in camelCase.
/// `on_progress(fraction, label, stage)` is called as stages begin.
///
/// The result carries `width`, `height`, `originalWidth`, `originalHeight`,
/// `palette`, `regions`, `timings`, `regionMap` (`Uint32Array`), `preview`
/// (PNG bytes), `sourceImage` (metadata plus JPEG `data`) and, when
/// requested, `vectorScene: { metadata, commands: Float32Array }`.
/// Calls share one pipeline: a newer call supersedes an older one, whose
/// result resolves to `null`.
#[wasm_bindgen]
pub fn generate_puzzle(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    options_json: Option<String>,
    on_progress: Option<Function>,
) -> Result<JsValue, JsValue> {
    let options = match options_json.as_deref() {
        Some(text) if !text.trim().is_empty() => {
            GenerationOptions::from_json(text).map_err(js_err)?
        }
        _ => GenerationOptions::default(),
    };
    let pixels = PixelBuffer::new(width, height, pixels).map_err(js_err)?;

    let report = |p: Progress| {
        if let Some(cb) = &on_progress {
            let _ = cb.call3(
                &JsValue::NULL,
                &JsValue::from_f64(p.fraction()),
                &JsValue::from_str(p.label()),
                &JsValue::from_str(p.stage.id()),
            );
        }
    };
    let generated = PIPELINE.with(|pipeline| pipeline.generate(&pixels, &options, report));
    let Some(data) = generated.map_err(js_err)? else {
        return Ok(JsValue::NULL);
    };

    let palette = Array::new();
    for entry in &data.palette {
        palette.push(&to_js(entry)?);
    }
    let regions = Array::new();
    for region in &data.regions {
        regions.push(&to_js(region)?);
    }
    let preview = preview_png(&data).map_err(js_err)?;

    let result = Object::new();
    Reflect::set(&result, &JsValue::from_str("width"), &JsValue::from(data.width))?;
    Reflect::set(&result, &JsValue::from_str("height"), &JsValue::from(data.height))?;
    Reflect::set(
        &result,
        &JsValue::from_str("originalWidth"),
        &JsValue::from(data.original_width),
    )?;
    Reflect::set(
        &result,
        &JsValue::from_str("originalHeight"),
        &JsValue::from(data.original_height),
    )?;
    Reflect::set(&result, &JsValue::from_str("palette"), &palette)?;
    Reflect::set(&result, &JsValue::from_str("regions"), &regions)?;
    Reflect::set(
        &result,
        &JsValue::from_str("regionMap"),
        &Uint32Array::from(data.region_map.as_slice()),
    )?;
    Reflect::set(&result, &JsValue::from_str("timings"), &to_js(&data.timings)?)?;
    Reflect::set(&result, &JsValue::from_str("preview"), &Uint8Array::from(preview.as_slice()))?;

    if let Some(source) = &data.source_image {
        let source_js = to_js(source)?;
        let bytes = Uint8Array::from(source.data.as_slice());
        Reflect::set(&source_js, &JsValue::from_str("data"), &bytes)?;
        Reflect::set(&result, &JsValue::from_str("sourceImage"), &source_js)?;
    }

    if let Some(scene) = &data.vector_scene {
        let scene_js = Object::new();
        Reflect::set(&scene_js, &JsValue::from_str("metadata"), &to_js(&scene.metadata)?)?;
        Reflect::set(
            &scene_js,
            &JsValue::from_str("commands"),
            &Float32Array::from(scene.commands.as_slice()),
        )?;
        Reflect::set(&result, &JsValue::from_str("vectorScene"), &scene_js)?;
    }

    Ok(result.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    fn flat(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::new(width, height, vec![90; (width * height * 4) as usize]).unwrap()
    }

    #[test]
    fn calls_share_one_pipeline() {
        let first = PIPELINE.with(|p| p as *const Pipeline);
        let second = PIPELINE.with(|p| p as *const Pipeline);
        assert_eq!(first, second);
        PIPELINE.with(|p| assert_eq!(p.mode(), MODE));
    }

    #[test]
    fn a_later_call_supersedes_an_earlier_one() {
        let opts = GenerationOptions { seed: Some(1), ..Default::default() };
        let pixels = flat(4, 4);
        let earlier = PIPELINE.with(|p| {
            p.generate(&pixels, &opts, |progress| {
                if progress.stage == Stage::Quantize {
                    let later = PIPELINE.with(|q| q.generate(&pixels, &opts, |_| {}));
                    assert!(later.unwrap().is_some());
                }
            })
        });
        assert!(earlier.unwrap().is_none());
    }
}
