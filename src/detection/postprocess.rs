use crate::detection::preprocessing::Letterbox;
use crate::models::Detection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const MAX_DETECTIONS: usize = 300;

/// Decode a YOLO detection head output.
///
/// `shape` is `[batch, 4 + classes, boxes]`, or `[batch, boxes, 4 + classes]` for
/// transposed exports. Rows are `cx cy w h` followed by per-class scores, in
/// model-input pixels. Only the first batch entry is read.
pub fn decode_predictions(
    data: &[f32],
    shape: [usize; 3],
    confidence: f32,
    letterbox: &Letterbox,
    image_size: (u32, u32),
) -> anyhow::Result<Vec<Detection>> {
    let [_batch, dim1, dim2] = shape;
    // The attribute axis is the short one: 84 vs 8400 for a COCO model
    let transposed = dim1 > dim2;
    let (attributes, boxes) = if transposed { (dim2, dim1) } else { (dim1, dim2) };

    if attributes < 5 {
        anyhow::bail!("Unexpected detection output shape {:?}", shape);
    }
    if data.len() < attributes * boxes {
        anyhow::bail!(
            "Detection output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            attributes * boxes
        );
    }

    let value = |attr: usize, idx: usize| -> f32 {
        if transposed {
            data[idx * attributes + attr]
        } else {
            data[attr * boxes + idx]
        }
    };

    let (img_w, img_h) = (image_size.0 as f32, image_size.1 as f32);
    let mut candidates = Vec::new();

    for idx in 0..boxes {
        let (class_id, score) = (4..attributes)
            .map(|attr| (attr - 4, value(attr, idx)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (value(0, idx), value(1, idx), value(2, idx), value(3, idx));
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        candidates.push(Detection {
            x1: x1.clamp(0.0, img_w),
            y1: y1.clamp(0.0, img_h),
            x2: x2.clamp(0.0, img_w),
            y2: y2.clamp(0.0, img_h),
            confidence: score,
            class_id,
        });
    }

    Ok(non_max_suppression(candidates, DEFAULT_IOU_THRESHOLD, MAX_DETECTIONS))
}

/// Greedy per-class NMS, highest confidence first
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
