// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error types.

use thiserror::Error;

/// Error when link address resolution failed.
///
/// Delivered to [`LinkResolutionNotifier`]s registered while an entry was in
/// the Incomplete state when the entry gives up on resolution.
///
/// [`LinkResolutionNotifier`]: crate::entry::LinkResolutionNotifier
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("address resolution failed")]
pub struct AddressResolutionFailed;

/// A transport-level failure reported by the link-address resolver when asked
/// to emit a reachability probe.
///
/// A probe that cannot be handed to the transport while an entry is actively
/// soliciting forces the entry into the Failed state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("failed to transmit a reachability probe")]
pub struct ProbeSendError;
