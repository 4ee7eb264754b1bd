//! Read-only mirror of the hub's `User`s and `Room`s.

use huddle_client_api_proto::{Room, RoomId, User, UserId};

/// Latest snapshot of `User`s and `Room`s pushed by the hub, along with the
/// `User` of this client.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    users: Vec<User>,
    rooms: Vec<Room>,
    local_user: Option<User>,
}

impl Roster {
    /// Replaces all the known `User`s, re-resolving the local one by its ID.
    pub fn set_users(&mut self, users: Vec<User>) {
        if let Some(local) = &self.local_user {
            if let Some(fresh) = users.iter().find(|u| u.id == local.id) {
                self.local_user = Some(fresh.clone());
            }
        }
        self.users = users;
    }

    /// Replaces all the known `Room`s.
    #[inline]
    pub fn set_rooms(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms;
    }

    /// Sets the `User` of this client.
    #[inline]
    pub fn set_local_user(&mut self, user: User) {
        self.local_user = Some(user);
    }

    /// Returns the `User` of this client, if registered.
    #[inline]
    #[must_use]
    pub fn local_user(&self) -> Option<&User> {
        self.local_user.as_ref()
    }

    /// Returns ID of the `User` of this client, if registered.
    #[inline]
    #[must_use]
    pub fn local_user_id(&self) -> Option<&UserId> {
        self.local_user.as_ref().map(|u| &u.id)
    }

    /// Returns all the known `User`s.
    #[inline]
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Returns all the known `Room`s.
    #[inline]
    #[must_use]
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Looks up a `Room` by its ID.
    #[must_use]
    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }
}

#[cfg(test)]
mod roster_spec {
    use super::*;

    fn user(id: &str, in_call: bool) -> User {
        User {
            id: id.into(),
            username: format!("user-{}", id),
            connection_id: format!("conn-{}", id).into(),
            in_call,
            room_id: None,
        }
    }

    #[test]
    fn re_resolves_local_user() {
        let mut roster = Roster::default();
        roster.set_local_user(user("u1", false));

        roster.set_users(vec![user("u0", false), user("u1", true)]);

        assert_eq!(roster.users().len(), 2);
        assert!(roster.local_user().unwrap().in_call);
        assert_eq!(roster.local_user_id(), Some(&UserId("u1".to_owned())));
    }

    #[test]
    fn keeps_local_user_missing_from_snapshot() {
        let mut roster = Roster::default();
        roster.set_local_user(user("u1", false));

        roster.set_users(vec![user("u2", false)]);

        assert_eq!(roster.local_user_id(), Some(&UserId("u1".to_owned())));
    }

    #[test]
    fn finds_room_by_id() {
        let mut roster = Roster::default();
        roster.set_rooms(vec![Room {
            id: "r1".into(),
            name: "lobby".to_owned(),
            user_ids: vec!["u1".into()],
        }]);

        assert_eq!(roster.room(&"r1".into()).unwrap().name, "lobby");
        assert!(roster.room(&"r2".into()).is_none());
    }
}
