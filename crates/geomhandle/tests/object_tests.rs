//! Dual-mode object tests

use std::rc::Rc;

use geomhandle::native::{GeometryData, InMemoryEngine, NativeEngine, NativeHandle, Point3};
use geomhandle::*;
use pretty_assertions::assert_eq;

fn setup() -> (Rc<InMemoryEngine>, Rc<BindingContext>) {
    let engine = InMemoryEngine::shared();
    let ctx = BindingContext::new(engine.clone());
    (engine, ctx)
}

fn p(x: f64, y: f64) -> Point3 {
    Point3::new(x, y, 0.0)
}

fn polyline() -> GeometryData {
    GeometryData::polyline(vec![p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0)])
}

fn owned_curve(engine: &InMemoryEngine, ctx: &Rc<BindingContext>) -> Geometry {
    Geometry::from_native(ctx, engine.insert(polyline())).unwrap()
}

fn points(geometry: &Geometry) -> Vec<Point3> {
    geometry.as_curve().unwrap().points().unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
// Owned and Referencing Resolution
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_owned_resolves_to_its_handle() {
    let (engine, ctx) = setup();
    let handle = engine.insert(polyline());
    let geometry = Geometry::from_native(&ctx, handle).unwrap();

    assert!(geometry.is_owned());
    assert_eq!(geometry.resolve_read().unwrap(), handle);
    assert_eq!(geometry.resolve_write().unwrap(), handle);
    assert_eq!(geometry.kind(), GeometryKind::Curve(native::CurveKind::Polyline));
}

#[test]
fn test_referencing_reads_current_parent_data() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    assert!(geometry.is_referencing());
    assert_eq!(geometry.parent_kind(), Some(ParentKind::LiveContainerMember));
    assert_eq!(points(&geometry), vec![p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0)]);

    let replacement = Geometry::from_native(
        &ctx,
        engine.insert(GeometryData::polyline(vec![p(5.0, 5.0), p(6.0, 6.0)])),
    )
    .unwrap();
    doc.replace(id, &replacement).unwrap();

    assert_eq!(points(&geometry), vec![p(5.0, 5.0), p(6.0, 6.0)]);
    assert!(geometry.is_referencing());
}

#[test]
fn test_read_never_copies() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    for _ in 0..3 {
        points(&geometry);
    }
    assert!(geometry.is_referencing());
    assert_eq!(engine.live_handles(), 1);
}

#[test]
fn test_first_write_privatizes() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    geometry
        .as_curve()
        .unwrap()
        .set_point(0, p(9.0, 9.0))
        .unwrap();

    assert!(geometry.is_owned());
    assert_eq!(geometry.parent_kind(), None);
    assert_eq!(points(&geometry)[0], p(9.0, 9.0));

    let stored = doc.geometry(id).unwrap();
    assert_eq!(points(&stored)[0], p(0.0, 0.0));
}

#[test]
fn test_second_write_reuses_private_copy() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    let first = geometry.resolve_write().unwrap();
    let second = geometry.resolve_write().unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.live_handles(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
// Duplicate
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_duplicate_is_owned_and_equal() {
    let (engine, ctx) = setup();
    let a = owned_curve(&engine, &ctx);
    let b = a.duplicate().unwrap();

    assert!(b.is_owned());
    assert_ne!(b.resolve_read().unwrap(), a.resolve_read().unwrap());
    assert_eq!(points(&a), points(&b));
    assert_eq!(b.kind(), a.kind());
}

#[test]
fn test_duplicate_is_independent_both_ways() {
    let (engine, ctx) = setup();
    let a = owned_curve(&engine, &ctx);
    let b = a.duplicate().unwrap();

    b.translate(0.0, 1.0, 0.0).unwrap();
    assert_eq!(points(&a)[0], p(0.0, 0.0));

    a.translate(0.0, -1.0, 0.0).unwrap();
    assert_eq!(points(&b)[0], p(0.0, 1.0));
}

#[test]
fn test_duplicate_of_referencing_leaves_source_referencing() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    let copy = geometry.duplicate().unwrap();
    assert!(copy.is_owned());
    assert!(geometry.is_referencing());
    assert_eq!(points(&copy), points(&geometry));
}

// ═══════════════════════════════════════════════════════════════════════
// EnsurePrivateCopy
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_ensure_private_copy_survives_parent_close() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    geometry.ensure_private_copy().unwrap();
    assert!(geometry.is_owned());

    doc.close();
    assert_eq!(points(&geometry).len(), 3);
}

#[test]
fn test_ensure_private_copy_is_idempotent() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    geometry.ensure_private_copy().unwrap();
    let handle = geometry.resolve_read().unwrap();
    geometry.ensure_private_copy().unwrap();
    assert_eq!(geometry.resolve_read().unwrap(), handle);
    assert_eq!(engine.live_handles(), 2);
}

#[test]
fn test_owned_curve_then_shallow_copy_scenario() {
    let (engine, ctx) = setup();
    let a = owned_curve(&engine, &ctx);
    let handle_a = a.resolve_read().unwrap();

    a.ensure_private_copy().unwrap();
    assert!(a.is_owned());
    assert_eq!(a.resolve_read().unwrap(), handle_a);

    let b = a.duplicate_shallow();
    b.as_curve().unwrap().set_point(1, p(5.0, 5.0)).unwrap();

    assert!(b.is_owned());
    assert_ne!(b.resolve_read().unwrap(), handle_a);
    assert_eq!(points(&a)[1], p(1.0, 0.0));
    assert_eq!(points(&b)[1], p(5.0, 5.0));
}

// ═══════════════════════════════════════════════════════════════════════
// Disposal
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_dispose_twice_frees_once() {
    let (engine, ctx) = setup();
    let geometry = owned_curve(&engine, &ctx);

    geometry.dispose();
    geometry.dispose();
    assert_eq!(engine.delete_calls(), 1);
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_dispose_then_drop_frees_once() {
    let (engine, ctx) = setup();
    let geometry = owned_curve(&engine, &ctx);

    geometry.dispose();
    drop(geometry);
    assert_eq!(engine.delete_calls(), 1);
    assert_eq!(engine.invalid_deletes(), 0);
}

#[test]
fn test_drop_alone_frees() {
    let (engine, ctx) = setup();
    let geometry = owned_curve(&engine, &ctx);
    drop(geometry);
    assert_eq!(engine.delete_calls(), 1);
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_disposed_object_is_collected() {
    let (engine, ctx) = setup();
    let geometry = owned_curve(&engine, &ctx);
    geometry.dispose();

    assert_eq!(geometry.state(), PointerState::Disposed);
    assert_eq!(geometry.resolve_read().unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(geometry.resolve_write().unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(geometry.ensure_private_copy().unwrap_err(), BindingError::ObjectCollected);
}

#[test]
fn test_disposing_referencing_does_not_free_parent() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();

    let geometry = doc.geometry(id).unwrap();
    geometry.dispose();
    drop(geometry);

    assert_eq!(engine.delete_calls(), 0);
    assert!(doc.geometry(id).is_ok());
}

#[test]
fn test_into_raw_hands_over_ownership() {
    let (engine, ctx) = setup();
    let handle = engine.insert(polyline());
    let object = CommonObject::owned(&ctx, handle).unwrap();

    assert_eq!(object.into_raw(), Some(handle));
    assert!(engine.contains(handle));
    assert_eq!(engine.delete_calls(), 0);
    assert_eq!(ctx.pressure().outstanding(), 0);
}

#[test]
fn test_into_raw_of_non_owner_is_none() {
    let (engine, ctx) = setup();
    let handle = engine.insert(polyline());
    let owner = CommonObject::owned(&ctx, handle).unwrap();
    let alias = owner.duplicate_shallow();

    assert_eq!(alias.into_raw(), None);
    assert!(engine.contains(handle));
    assert!(owner.is_owned());
}

#[test]
fn test_wrap_borrowed_never_frees() {
    let (engine, ctx) = setup();
    let handle: NativeHandle = engine.insert(polyline());
    {
        let borrowed = Geometry::wrap_borrowed(&ctx, handle).unwrap();
        assert_eq!(borrowed.state(), PointerState::Borrowed);
        borrowed.translate(1.0, 0.0, 0.0).unwrap();
        assert_eq!(borrowed.resolve_read().unwrap(), handle);
    }
    assert!(engine.contains(handle));
    assert_eq!(engine.delete_calls(), 0);
    engine.delete(handle);
}

// ═══════════════════════════════════════════════════════════════════════
// Const Cast
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_const_cast_pins_current_handle() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();
    let stored = geometry.resolve_read().unwrap();

    assert!(geometry.apply_const_cast().unwrap());
    assert_eq!(geometry.state(), PointerState::Borrowed);
    assert_eq!(geometry.resolve_read().unwrap(), stored);
    assert_eq!(geometry.parent_kind(), Some(ParentKind::LiveContainerMember));

    assert!(geometry.remove_const_cast());
    assert!(geometry.is_referencing());
    assert!(!geometry.remove_const_cast());
    assert_eq!(engine.delete_calls(), 0);
}

#[test]
fn test_write_during_const_cast_copies() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    let guard = geometry.const_cast_guard().unwrap();
    assert!(guard.applied());
    guard.resolve_write().unwrap();
    assert!(guard.is_owned());
    drop(guard);

    assert!(geometry.is_owned());
    let stored = doc.geometry(id).unwrap();
    assert_ne!(stored.resolve_read().unwrap(), geometry.resolve_read().unwrap());
}

#[test]
fn test_const_cast_on_disposed_fails() {
    let (engine, ctx) = setup();
    let geometry = owned_curve(&engine, &ctx);
    geometry.dispose();
    assert_eq!(geometry.apply_const_cast().unwrap_err(), BindingError::ObjectCollected);
}

#[test]
fn test_const_cast_handle_freed_by_delete_is_collected() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();

    let guard = geometry.const_cast_guard().unwrap();
    assert!(doc.delete(id).unwrap());

    assert_eq!(guard.resolve_read().unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(
        geometry.as_curve().unwrap().points().unwrap_err(),
        BindingError::ObjectCollected
    );
    assert_eq!(guard.ensure_private_copy().unwrap_err(), BindingError::ObjectCollected);
}

#[test]
fn test_const_cast_handle_swapped_by_replace_is_collected() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let geometry = doc.geometry(id).unwrap();
    let replacement = Geometry::from_native(
        &ctx,
        engine.insert(GeometryData::polyline(vec![p(7.0, 0.0), p(8.0, 0.0)])),
    )
    .unwrap();

    {
        let guard = geometry.const_cast_guard().unwrap();
        doc.replace(id, &replacement).unwrap();
        assert_eq!(guard.resolve_read().unwrap_err(), BindingError::ObjectCollected);
    }

    assert!(geometry.is_referencing());
    assert_eq!(points(&geometry), vec![p(7.0, 0.0), p(8.0, 0.0)]);
}

#[test]
fn test_const_cast_handle_freed_by_release_is_collected() {
    let (engine, ctx) = setup();
    let doc = Document::new(&ctx);
    let id = doc.add_native(engine.insert(polyline())).unwrap();
    let objref = doc.capture(id).unwrap();
    let geometry = objref.geometry().unwrap();

    let guard = geometry.const_cast_guard().unwrap();
    objref.release();

    assert_eq!(guard.resolve_read().unwrap_err(), BindingError::ObjectCollected);
    assert_eq!(engine.invalid_deletes(), 0);
}
