//! Container parent tests: documents, captured references, file models and
//! composite curve segments

use std::rc::Rc;

use geomhandle::native::{ComponentIndex, CurveKind, GeometryData, InMemoryEngine, Point3};
use geomhandle::*;
use pretty_assertions::assert_eq;

fn setup() -> (Rc<InMemoryEngine>, Rc<BindingContext>) {
    let engine = InMemoryEngine::shared();
    let ctx = BindingContext::new(engine.clone());
    (engine, ctx)
}

fn at(x: f64) -> Point3 {
    Point3::new(x, 0.0, 0.0)
}

fn point(x: f64) -> GeometryData {
    GeometryData::Point(at(x))
}

fn two_segments() -> GeometryData {
    GeometryData::PolyCurve(vec![
        GeometryData::line(at(0.0), at(1.0)),
        GeometryData::line(at(1.0), at(2.0)),
    ])
}

fn location(geometry: &Geometry) -> Point3 {
    geometry.as_point().unwrap().location().unwrap()
}

fn segment_points(poly: &Geometry, index: i64) -> Vec<Point3> {
    poly.as_polycurve()
        .unwrap()
        .segment(index)
        .unwrap()
        .as_curve()
        .unwrap()
        .points()
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
// Document Lifetime
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_close_collects_wrappers() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let geometry = doc.geometry(id).unwrap();

    doc.close();
    doc.close();

    assert!(!doc.is_open());
    assert_eq!(geometry.resolve_read().unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(
        geometry.translate(1.0, 0.0, 0.0).unwrap_err(),
        BindingError::ObjectCollected
    );
    assert_eq!(doc.geometry(id).unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(
        doc.add_native(engine.insert(point(2.0))).unwrap_err(),
        BindingError::ObjectCollected
    );
    assert_eq!(engine.invalid_deletes(), 0);
}

#[test]
fn test_dropped_document_collects_wrappers() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let geometry = doc.geometry(id).unwrap();

    drop(doc);

    assert!(geometry.resolve_read().unwrap_err().is_collected());
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_private_copy_survives_close() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let geometry = doc.geometry(id).unwrap();
    geometry.ensure_private_copy().unwrap();

    doc.close();

    assert_eq!(location(&geometry), at(1.0));
    assert_eq!(engine.live_handles(), 1);
}

#[test]
fn test_delete_collects_only_that_object() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let a = doc.add_native(engine.insert(point(1.0))).unwrap();
    let b = doc.add_native(engine.insert(point(2.0))).unwrap();
    let ga = doc.geometry(a).unwrap();
    let gb = doc.geometry(b).unwrap();

    assert!(doc.delete(a).unwrap());
    assert!(!doc.delete(a).unwrap());

    assert!(ga.resolve_read().unwrap_err().is_collected());
    assert_eq!(location(&gb), at(2.0));
    assert_eq!(doc.ids(), vec![b]);
}

// ═══════════════════════════════════════════════════════════════════════
// Document Editing
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_add_stores_a_copy() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let source = Geometry::from_native(&ctx, engine.insert(point(1.0))).unwrap();

    let id = doc.add(&source).unwrap();
    source.translate(5.0, 0.0, 0.0).unwrap();

    assert_eq!(location(&doc.geometry(id).unwrap()), at(1.0));
    assert_eq!(location(&source), at(6.0));
}

#[test]
fn test_ids_keep_insertion_order() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let first = doc.add_native(engine.insert(point(1.0))).unwrap();
    let second = doc.add_native(engine.insert(point(2.0))).unwrap();
    let third = doc.add_native(engine.insert(point(3.0))).unwrap();

    doc.delete(second).unwrap();
    let fourth = doc.add_native(engine.insert(point(4.0))).unwrap();

    assert_eq!(doc.ids(), vec![first, third, fourth]);
    assert_eq!(doc.len(), 3);
    assert_eq!(first.to_string(), "#1");
    assert_eq!(fourth.as_u64(), 4);
}

#[test]
fn test_replace_commits_edit() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let editor = doc.geometry(id).unwrap();
    let watcher = doc.geometry(id).unwrap();

    editor.translate(1.0, 0.0, 0.0).unwrap();
    assert_eq!(location(&watcher), at(1.0));

    doc.replace(id, &editor).unwrap();

    assert_eq!(location(&watcher), at(2.0));
    assert!(watcher.is_referencing());
    assert!(editor.is_owned());
    assert_eq!(engine.live_handles(), 2);
}

#[test]
fn test_replace_missing_object() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let source = doc.geometry(id).unwrap().duplicate().unwrap();
    doc.delete(id).unwrap();

    assert_eq!(
        doc.replace(id, &source).unwrap_err(),
        BindingError::ObjectCollected
    );
}

#[test]
fn test_read_only_document() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    doc.set_read_only(true);
    let violation = BindingError::ReadOnlyViolation {
        container: "document",
    };

    let geometry = doc.geometry(id).unwrap();
    assert!(geometry.is_read_only());
    assert_eq!(geometry.translate(1.0, 0.0, 0.0).unwrap_err(), violation);
    assert_eq!(doc.delete(id).unwrap_err(), violation);
    assert_eq!(doc.add(&geometry).unwrap_err(), violation);

    let copy = geometry.duplicate().unwrap();
    assert!(!copy.is_read_only());
    copy.translate(1.0, 0.0, 0.0).unwrap();
    assert_eq!(location(&copy), at(2.0));
    assert_eq!(location(&geometry), at(1.0));
}

#[test]
fn test_component_geometry_checks_range() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(two_segments())).unwrap();

    let segment = doc.component_geometry(id, ComponentIndex::segment(1)).unwrap();
    assert_eq!(
        segment.as_curve().unwrap().points().unwrap(),
        vec![at(1.0), at(2.0)]
    );
    assert_eq!(
        doc.component_geometry(id, ComponentIndex::segment(5)).unwrap_err(),
        BindingError::ComponentIndex { index: 5, count: 2 }
    );
}

#[test]
fn test_component_write_copies_only_the_component() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(two_segments())).unwrap();
    let segment = doc.component_geometry(id, ComponentIndex::segment(0)).unwrap();

    segment.translate(0.0, 1.0, 0.0).unwrap();

    assert!(segment.is_owned());
    assert_eq!(segment.kind(), GeometryKind::Curve(CurveKind::Line));
    let stored = doc.geometry(id).unwrap();
    assert_eq!(segment_points(&stored, 0), vec![at(0.0), at(1.0)]);
}

// ═══════════════════════════════════════════════════════════════════════
// Captured References
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_captured_reference_survives_document_delete() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let objref = doc.capture(id).unwrap();

    doc.delete(id).unwrap();

    assert_eq!(objref.object_id(), id);
    let geometry = objref.geometry().unwrap();
    assert_eq!(geometry.parent_kind(), Some(ParentKind::CapturedReference));
    assert_eq!(location(&geometry), at(1.0));
}

#[test]
fn test_captured_reference_is_never_read_only() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let objref = doc.capture(id).unwrap();
    doc.set_read_only(true);

    let geometry = objref.geometry().unwrap();
    assert!(!geometry.is_read_only());
    geometry.translate(1.0, 0.0, 0.0).unwrap();

    assert!(geometry.is_owned());
    assert_eq!(location(&objref.geometry().unwrap()), at(1.0));
}

#[test]
fn test_release_collects_reference_wrappers() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let objref = doc.capture(id).unwrap();
    let geometry = objref.geometry().unwrap();

    objref.release();
    objref.release();

    assert!(objref.is_released());
    assert!(geometry.resolve_read().unwrap_err().is_collected());
    assert_eq!(engine.live_handles(), 1);
}

#[test]
fn test_dropped_reference_collects_wrappers() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let objref = doc.capture(id).unwrap();
    let geometry = objref.geometry().unwrap();

    drop(objref);

    assert!(geometry.resolve_read().unwrap_err().is_collected());
    assert_eq!(engine.invalid_deletes(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// File Models
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_file_model_index_errors() {
    let (engine, ctx) = setup();
    let model = FileModel::from_handles(
        &ctx,
        vec![engine.insert(point(1.0)), engine.insert(point(2.0))],
        false,
    );

    assert_eq!(
        model.geometry(5).unwrap_err(),
        BindingError::ComponentIndex { index: 5, count: 2 }
    );
    assert_eq!(
        model.geometry(-1).unwrap_err(),
        BindingError::ComponentIndex { index: -1, count: 2 }
    );
    assert_eq!(location(&model.geometry(1).unwrap()), at(2.0));
}

#[test]
fn test_file_model_element_copy_on_write() {
    let (engine, ctx) = setup();
    let model = FileModel::from_handles(&ctx, vec![engine.insert(point(1.0))], false);
    let element = model.geometry(0).unwrap();

    element.translate(1.0, 0.0, 0.0).unwrap();

    assert!(element.is_owned());
    assert_eq!(location(&element), at(2.0));
    assert_eq!(location(&model.geometry(0).unwrap()), at(1.0));
    assert_eq!(model.add(&element).unwrap(), 1);
    assert_eq!(model.len(), 2);
}

#[test]
fn test_read_only_file_model() {
    let (engine, ctx) = setup();
    let model = FileModel::from_handles(&ctx, vec![engine.insert(point(1.0))], true);
    let violation = BindingError::ReadOnlyViolation {
        container: "file model",
    };

    let element = model.geometry(0).unwrap();
    assert!(model.is_read_only());
    assert_eq!(element.translate(1.0, 0.0, 0.0).unwrap_err(), violation);
    assert_eq!(model.add(&element).unwrap_err(), violation);

    element.ensure_private_copy().unwrap();
    element.translate(1.0, 0.0, 0.0).unwrap();
    assert_eq!(location(&element), at(2.0));
}

#[test]
fn test_closed_file_model_collects_elements() {
    let (engine, ctx) = setup();
    let model = FileModel::from_handles(&ctx, vec![engine.insert(point(1.0))], false);
    let element = model.geometry(0).unwrap();

    model.close();

    assert!(model.is_empty());
    assert!(element.resolve_read().unwrap_err().is_collected());
    assert_eq!(engine.live_handles(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Composite Curve Segments
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_segment_write_goes_into_owner() {
    let (engine, ctx) = setup();
    let poly = Geometry::from_native(&ctx, engine.insert(two_segments())).unwrap();
    let segment = poly.as_polycurve().unwrap().segment(0).unwrap();
    let before = engine.live_handles();

    segment.translate(0.0, 1.0, 0.0).unwrap();

    assert_eq!(engine.live_handles(), before);
    assert!(segment.is_referencing());
    assert_eq!(segment.parent_kind(), Some(ParentKind::CompositeCurveSegment));
    assert_eq!(
        segment_points(&poly, 0),
        vec![Point3::new(0.0, 1.0, 0.0), Point3::new(1.0, 1.0, 0.0)]
    );
}

#[test]
fn test_segment_of_stored_curve_privatizes_owner() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(two_segments())).unwrap();
    let poly = doc.geometry(id).unwrap();
    let segment = poly.as_polycurve().unwrap().segment(1).unwrap();

    segment.translate(1.0, 0.0, 0.0).unwrap();

    assert!(poly.is_owned());
    assert!(segment.is_referencing());
    assert_eq!(segment_points(&poly, 1), vec![at(2.0), at(3.0)]);
    let stored = doc.geometry(id).unwrap();
    assert_eq!(segment_points(&stored, 1), vec![at(1.0), at(2.0)]);
}

#[test]
fn test_segment_index_errors() {
    let (engine, ctx) = setup();
    let poly = Geometry::from_native(&ctx, engine.insert(two_segments())).unwrap();
    let poly = poly.as_polycurve().unwrap();

    assert_eq!(
        poly.segment(2).unwrap_err(),
        BindingError::ComponentIndex { index: 2, count: 2 }
    );
    assert_eq!(
        poly.segment(-1).unwrap_err(),
        BindingError::ComponentIndex { index: -1, count: 2 }
    );
}

#[test]
fn test_disposed_owner_collects_segments() {
    let (engine, ctx) = setup();
    let poly = Geometry::from_native(&ctx, engine.insert(two_segments())).unwrap();
    let segment = poly.as_polycurve().unwrap().segment(0).unwrap();

    poly.dispose();

    assert!(segment.resolve_read().unwrap_err().is_collected());
    assert!(segment.translate(1.0, 0.0, 0.0).unwrap_err().is_collected());
}

#[test]
fn test_append_copies_segment() {
    let (engine, ctx) = setup();
    let poly = Geometry::from_native(&ctx, engine.insert(two_segments())).unwrap();
    let line = Geometry::from_native(&ctx, engine.insert(GeometryData::line(at(2.0), at(3.0)))).unwrap();
    let composite = poly.as_polycurve().unwrap();

    assert!(composite.append(&line).unwrap());
    line.translate(10.0, 0.0, 0.0).unwrap();

    assert_eq!(composite.segment_count().unwrap(), 3);
    assert_eq!(segment_points(&poly, 2), vec![at(2.0), at(3.0)]);
    assert!(line.is_owned());
}

// ═══════════════════════════════════════════════════════════════════════
// Unmodelled Types
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_unknown_type_is_owned_and_disposable() {
    let (engine, ctx) = setup();
    let handle = engine.insert(GeometryData::Opaque {
        type_code: 99,
        bytes: vec![0; 16],
    });
    let geometry = Geometry::from_native(&ctx, handle).unwrap();

    match &geometry {
        Geometry::Unknown(unknown) => assert_eq!(unknown.type_code(), 99),
        other => panic!("expected unknown geometry, got {other:?}"),
    }
    assert_eq!(geometry.kind(), GeometryKind::Unknown(99));
    assert!(!geometry.translate(1.0, 0.0, 0.0).unwrap());

    geometry.dispose();
    assert!(!engine.contains(handle));
}

// ═══════════════════════════════════════════════════════════════════════
// Tracked Object Geometry
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_object_geometry_is_one_wrapper_per_object() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();

    let first = doc.object_geometry(id).unwrap();
    let second = doc.object_geometry(id).unwrap();
    assert!(first.is_referencing());
    assert!(!doc.is_edited(id));

    first.translate(1.0, 0.0, 0.0).unwrap();

    assert!(second.is_owned());
    assert_eq!(location(&second), at(2.0));
    assert!(doc.is_edited(id));
    assert_eq!(location(&doc.object_geometry(id).unwrap()), at(2.0));
    // The stored object is untouched until the edit is committed.
    assert_eq!(location(&doc.geometry(id).unwrap()), at(1.0));
}

#[test]
fn test_commit_changes_stores_the_edit() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let edited = doc.object_geometry(id).unwrap();
    edited.translate(4.0, 0.0, 0.0).unwrap();

    assert!(doc.commit_changes(id).unwrap());

    assert!(!doc.is_edited(id));
    assert_eq!(location(&doc.geometry(id).unwrap()), at(5.0));
    let fresh = doc.object_geometry(id).unwrap();
    assert!(fresh.is_referencing());
    assert_eq!(location(&fresh), at(5.0));
    assert!(edited.is_owned());
    assert_eq!(engine.live_handles(), 2);
    assert!(!doc.commit_changes(id).unwrap());
}

#[test]
fn test_commit_without_edit_does_nothing() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    assert!(!doc.commit_changes(id).unwrap());

    let tracked = doc.object_geometry(id).unwrap();
    location(&tracked);
    assert!(!doc.commit_changes(id).unwrap());
    assert_eq!(engine.delete_calls(), 0);
}

#[test]
fn test_commit_on_read_only_document_keeps_edit() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    doc.object_geometry(id).unwrap().translate(1.0, 0.0, 0.0).unwrap();
    doc.set_read_only(true);

    assert_eq!(
        doc.commit_changes(id).unwrap_err(),
        BindingError::ReadOnlyViolation {
            container: "document"
        }
    );
    assert!(doc.is_edited(id));
    assert_eq!(location(&doc.geometry(id).unwrap()), at(1.0));
}

#[test]
fn test_delete_forgets_uncommitted_edit() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    let edited = doc.object_geometry(id).unwrap();
    edited.translate(1.0, 0.0, 0.0).unwrap();

    doc.delete(id).unwrap();

    assert!(!doc.is_edited(id));
    assert_eq!(location(&edited), at(2.0));
    assert_eq!(doc.object_geometry(id).unwrap_err(), BindingError::ObjectCollected);
}

#[test]
fn test_disposed_tracked_wrapper_is_replaced() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(point(1.0))).unwrap();
    doc.object_geometry(id).unwrap().dispose();

    let again = doc.object_geometry(id).unwrap();
    assert!(again.is_referencing());
    assert_eq!(location(&again), at(1.0));
}
