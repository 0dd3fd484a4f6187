// crates/mediacut-core/src/event.rs
//
// A time-bounded activation of one blueprint + one curve set + masks inside
// an event stack. Events never validate themselves against siblings - range
// rules live in the owning stack, which is the only mutator of start/end/z.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::curves::KeyPointSet;
use crate::error::{EngineError, EngineResult};
use crate::frame::MaskFrame;
use crate::host::{Blueprint, BlueprintFactory, HostEnv, MaskRenderOptions};

/// Event status is a plain bit field owned by the embedding application
/// (selection, mute, soloing…). The engine stores it and round-trips it.
pub type EventStatus = u32;

pub struct Event<F> {
    id:      i64,
    start:   i64,
    end:     i64,
    z:       i32,
    status:  EventStatus,
    blueprint: Box<dyn Blueprint<F>>,
    curves:  KeyPointSet,
    /// Mask descriptor JSON and the rendered alpha images, index-aligned.
    /// Indices are stable addressing handles for the editing UI.
    mask_descs:  Vec<Value>,
    mask_alphas: Vec<MaskFrame>,
    /// Per-blueprint-node masks, descriptor-only - the node interprets them.
    node_masks: BTreeMap<i64, Vec<Value>>,
}

impl<F> Event<F> {
    pub(crate) fn new(
        id: i64,
        start: i64,
        end: i64,
        z: i32,
        blueprint: Box<dyn Blueprint<F>>,
    ) -> Self {
        Self {
            id,
            start,
            end,
            z,
            status: 0,
            blueprint,
            curves: KeyPointSet::new(0, end - start),
            mask_descs: Vec::new(),
            mask_alphas: Vec::new(),
            node_masks: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn length(&self) -> i64 {
        self.end - self.start
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.start && pos < self.end
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }

    pub fn set_status_bit(&mut self, bit: u32, value: bool) {
        if value {
            self.status |= 1 << bit;
        } else {
            self.status &= !(1 << bit);
        }
    }

    pub fn change_id(&mut self, id: i64) {
        self.id = id;
    }

    pub fn curves(&self) -> &KeyPointSet {
        &self.curves
    }

    pub fn curves_mut(&mut self) -> &mut KeyPointSet {
        &mut self.curves
    }

    pub fn blueprint(&self) -> &dyn Blueprint<F> {
        self.blueprint.as_ref()
    }

    pub fn blueprint_mut(&mut self) -> &mut dyn Blueprint<F> {
        self.blueprint.as_mut()
    }

    /// Stack-internal: update the range and keep the curve span in sync.
    pub(crate) fn set_range(&mut self, start: i64, end: i64) {
        self.start = start;
        self.end = end;
        self.curves.set_range_x(0, end - start, true);
    }

    /// Stack-internal: move without touching the curve span (length is kept).
    pub(crate) fn set_position(&mut self, start: i64, z: i32) {
        let len = self.length();
        self.start = start;
        self.end = start + len;
        self.z = z;
    }

    // ── Event-level masks ─────────────────────────────────────────────────────

    pub fn mask_count(&self) -> usize {
        self.mask_descs.len()
    }

    pub fn mask_desc(&self, index: usize) -> EngineResult<&Value> {
        self.mask_descs.get(index).ok_or_else(|| {
            EngineError::not_found(format!(
                "event {} has {} masks, no mask at index {index}",
                self.id,
                self.mask_descs.len()
            ))
        })
    }

    pub fn mask_alpha(&self, index: usize) -> Option<&MaskFrame> {
        self.mask_alphas.get(index)
    }

    /// Store a mask descriptor. `index < 0` or `index == mask_count()`
    /// appends; an in-range index replaces. The rendered alpha image is
    /// taken from `prerendered` or rasterized through the host mask library,
    /// keeping the descriptor and alpha arrays aligned.
    pub fn save_mask(
        &mut self,
        host: &HostEnv,
        desc: Value,
        prerendered: Option<MaskFrame>,
        index: i32,
    ) -> EngineResult<()> {
        let len = self.mask_descs.len() as i32;
        if index > len {
            return Err(EngineError::invalid_arg(format!(
                "event {} has {len} masks, cannot save mask at index {index}",
                self.id
            )));
        }
        let alpha = match prerendered {
            Some(m) => m,
            None => host.masks.from_json(&desc)?.render(&MaskRenderOptions::default()),
        };
        if index < 0 || index == len {
            self.mask_descs.push(desc);
            self.mask_alphas.push(alpha);
        } else {
            self.mask_descs[index as usize] = desc;
            self.mask_alphas[index as usize] = alpha;
        }
        Ok(())
    }

    /// Remove the mask at `index` from both the descriptor and alpha arrays.
    pub fn remove_mask(&mut self, index: usize) -> EngineResult<()> {
        if index >= self.mask_descs.len() {
            return Err(EngineError::not_found(format!(
                "event {} has {} masks, cannot remove mask at index {index}",
                self.id,
                self.mask_descs.len()
            )));
        }
        self.mask_descs.remove(index);
        self.mask_alphas.remove(index);
        Ok(())
    }

    /// Element-wise max over all event masks, or None when there are none.
    pub fn combined_mask(&self) -> Option<MaskFrame> {
        let mut iter = self.mask_alphas.iter();
        let mut combined = iter.next()?.clone();
        for m in iter {
            combined.union_max(m);
        }
        Some(combined)
    }

    // ── Per-node masks ────────────────────────────────────────────────────────

    pub fn node_mask_count(&self, node_id: i64) -> usize {
        self.node_masks.get(&node_id).map_or(0, Vec::len)
    }

    pub fn node_mask(&self, node_id: i64, index: usize) -> EngineResult<&Value> {
        let masks = self
            .node_masks
            .get(&node_id)
            .ok_or_else(|| EngineError::not_found(format!("no mask for node id {node_id}")))?;
        masks.get(index).ok_or_else(|| {
            EngineError::not_found(format!(
                "node {node_id} has {} masks, no mask at index {index}",
                masks.len()
            ))
        })
    }

    pub fn save_node_mask(&mut self, node_id: i64, desc: Value, index: i32) -> EngineResult<()> {
        let masks = self.node_masks.entry(node_id).or_default();
        let len = masks.len() as i32;
        if index > len {
            return Err(EngineError::invalid_arg(format!(
                "node {node_id} has {len} masks, cannot save mask at index {index}"
            )));
        }
        if index < 0 || index == len {
            masks.push(desc);
        } else {
            masks[index as usize] = desc;
        }
        Ok(())
    }

    pub fn remove_node_mask(&mut self, node_id: i64, index: usize) -> EngineResult<()> {
        let masks = self
            .node_masks
            .get_mut(&node_id)
            .ok_or_else(|| EngineError::not_found(format!("no mask for node id {node_id}")))?;
        if index >= masks.len() {
            return Err(EngineError::not_found(format!(
                "node {node_id} has {} masks, cannot remove mask at index {index}",
                masks.len()
            )));
        }
        masks.remove(index);
        if masks.is_empty() {
            self.node_masks.remove(&node_id);
        }
        Ok(())
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    /// Serialize. Mask arrays are only written on the video side
    /// (`include_masks`), matching the on-disk schema.
    pub fn save_as_json(&self, include_masks: bool) -> Value {
        let mut j = json!({
            "id": self.id,
            "start": self.start,
            "end": self.end,
            "z": self.z,
            "bp": self.blueprint.serialize(),
            "kp": self.curves.save_as_json(),
        });
        if include_masks {
            j["event_masks"] = Value::Array(self.mask_descs.clone());
            let table: Vec<Value> = self
                .node_masks
                .iter()
                .map(|(node_id, masks)| json!({ "node_id": node_id, "masks": masks }))
                .collect();
            j["effect_mask_table"] = Value::Array(table);
        }
        j
    }

    /// Restore an event from JSON. `id`/`start`/`end`/`z`/`bp`/`kp` are
    /// required; the blueprint must parse to a valid graph. Mask descriptors
    /// are re-rasterized through the host mask library; descriptors the
    /// library rejects are dropped with a warning rather than failing the
    /// whole event.
    pub fn load_from_json(
        json: &Value,
        factory: &dyn BlueprintFactory<F>,
        host: &HostEnv,
        bp_name: &str,
        bp_kind: &str,
        include_masks: bool,
    ) -> EngineResult<Self> {
        fn required_i64(json: &Value, key: &str) -> EngineResult<i64> {
            json.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| EngineError::ParseFailed(format!("bad event json: missing '{key}'")))
        }

        let id = required_i64(json, "id")?;
        let start = required_i64(json, "start")?;
        let end = required_i64(json, "end")?;
        let z = required_i64(json, "z")? as i32;

        let bp_json = json
            .get("bp")
            .ok_or_else(|| EngineError::ParseFailed("bad event json: missing 'bp'".into()))?;
        let blueprint = factory.new_filter(bp_json, bp_name, bp_kind)?;
        if !blueprint.is_valid() {
            return Err(EngineError::ParseFailed("bad event json: invalid blueprint json".into()));
        }

        let kp_json = json
            .get("kp")
            .ok_or_else(|| EngineError::ParseFailed("bad event json: missing 'kp'".into()))?;
        let mut curves = KeyPointSet::load_from_json(kp_json)?;
        curves.set_range_x(0, end - start, true);

        let mut event = Event::new(id, start, end, z, blueprint);
        event.curves = curves;

        if include_masks {
            if let Some(descs) = json.get("event_masks").and_then(Value::as_array) {
                for desc in descs {
                    match host.masks.from_json(desc) {
                        Ok(src) => {
                            event.mask_descs.push(desc.clone());
                            event.mask_alphas.push(src.render(&MaskRenderOptions::default()));
                        }
                        Err(e) => log::warn!("event {id}: dropping unreadable mask: {e}"),
                    }
                }
            }
            if let Some(table) = json.get("effect_mask_table").and_then(Value::as_array) {
                for entry in table {
                    let node_id = entry.get("node_id").and_then(Value::as_i64);
                    let masks = entry.get("masks").and_then(Value::as_array);
                    if let (Some(node_id), Some(masks)) = (node_id, masks) {
                        event.node_masks.insert(node_id, masks.clone());
                    }
                }
            }
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoFrame;
    use serde_json::json;

    fn rect_desc(x: u32, y: u32, w: u32, h: u32) -> Value {
        json!({
            "type": "rect", "x": x, "y": y, "w": w, "h": h,
            "alpha": 1.0, "canvas_w": 128, "canvas_h": 128
        })
    }

    fn test_event() -> (HostEnv, Event<VideoFrame>) {
        let host = HostEnv::inert();
        let bp = host
            .video_blueprints
            .new_filter(&json!({}), "VideoEventBp", "Video")
            .unwrap();
        (host, Event::new(1, 100, 200, 0, bp))
    }

    #[test]
    fn contains_is_half_open() {
        let (_, ev) = test_event();
        assert!(ev.contains(100));
        assert!(ev.contains(199));
        assert!(!ev.contains(200));
        assert!(!ev.contains(99));
    }

    #[test]
    fn save_mask_appends_and_replaces() {
        let (host, mut ev) = test_event();
        ev.save_mask(&host, rect_desc(0, 0, 10, 10), None, -1).unwrap();
        ev.save_mask(&host, rect_desc(5, 5, 10, 10), None, 1).unwrap(); // index == len appends
        assert_eq!(ev.mask_count(), 2);
        ev.save_mask(&host, rect_desc(9, 9, 1, 1), None, 0).unwrap(); // replace
        assert_eq!(ev.mask_count(), 2);
        assert!(ev.save_mask(&host, rect_desc(0, 0, 1, 1), None, 5).is_err());
    }

    #[test]
    fn remove_mask_keeps_arrays_aligned() {
        let (host, mut ev) = test_event();
        ev.save_mask(&host, rect_desc(0, 0, 10, 10), None, -1).unwrap();
        ev.save_mask(&host, rect_desc(40, 40, 80, 80), None, -1).unwrap();
        ev.remove_mask(0).unwrap();
        assert_eq!(ev.mask_count(), 1);
        assert_eq!(ev.mask_alphas.len(), 1);
        // The remaining mask is the second rectangle.
        assert_eq!(ev.mask_alpha(0).unwrap().alpha_at(60, 60), 1.0);
    }

    #[test]
    fn combined_mask_is_element_wise_max() {
        let (host, mut ev) = test_event();
        ev.save_mask(&host, rect_desc(0, 0, 50, 50), None, -1).unwrap();
        ev.save_mask(&host, rect_desc(40, 40, 80, 80), None, -1).unwrap();
        let combined = ev.combined_mask().unwrap();
        assert_eq!(combined.alpha_at(45, 45), 1.0);
        assert_eq!(combined.alpha_at(60, 60), 1.0);
        assert_eq!(combined.alpha_at(90, 0), 0.0);
    }

    #[test]
    fn node_masks_round_trip_json() {
        let (host, mut ev) = test_event();
        ev.save_node_mask(42, rect_desc(0, 0, 4, 4), -1).unwrap();
        ev.save_mask(&host, rect_desc(0, 0, 8, 8), None, -1).unwrap();
        let json = ev.save_as_json(true);
        let back = Event::<VideoFrame>::load_from_json(
            &json,
            host.video_blueprints.as_ref(),
            &host,
            "VideoEventBp",
            "Video",
            true,
        )
        .unwrap();
        assert_eq!(back.node_mask_count(42), 1);
        assert_eq!(back.mask_count(), 1);
        assert_eq!(back.id(), 1);
        assert_eq!(back.length(), 100);
    }

    #[test]
    fn load_rejects_missing_fields() {
        let (host, _) = test_event();
        let json = json!({ "id": 1, "start": 0, "end": 10 }); // no z/bp/kp
        assert!(Event::<VideoFrame>::load_from_json(
            &json,
            host.video_blueprints.as_ref(),
            &host,
            "VideoEventBp",
            "Video",
            true,
        )
        .is_err());
    }
}
